use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use {
    chatplug_hub::ConfigurationField,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::error::{Error, Result};

/// Default Discord REST base URL.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Default capacity of the native event queue between the gateway and the
/// inbound relay.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Persisted per-instance configuration, stored as `config.<instance>.json`.
#[derive(Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Discord bot token.
    #[serde(rename = "botToken", serialize_with = "serialize_secret")]
    pub bot_token: Secret<String>,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

impl BridgeConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: Secret::new(bot_token.into()),
        }
    }

    /// Location of the configuration record for `instance_id` under `dir`.
    pub fn path(dir: &Path, instance_id: &str) -> PathBuf {
        dir.join(format!("config.{instance_id}.json"))
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ConfigMissing {
                    path: path.display().to_string(),
                });
            },
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::config_invalid(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded bridge configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        debug!(path = %path.display(), "saved bridge configuration");
        Ok(())
    }

    /// Build from values submitted against [`configuration_schema`], in
    /// schema order.
    pub fn from_field_values(values: &[String]) -> Result<Self> {
        let token = values
            .first()
            .ok_or_else(|| Error::config_invalid("no value submitted for the bot token"))?;
        let config = Self::new(token.trim());
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bot_token.expose_secret().trim().is_empty() {
            return Err(Error::config_invalid("bot token is empty"));
        }
        Ok(())
    }
}

/// Fields the hub must collect before the bridge can start.
pub fn configuration_schema() -> Vec<ConfigurationField> {
    vec![ConfigurationField::string("Your Discord bot token").masked()]
}

/// Runtime options supplied by the process environment.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub instance_id: String,
    pub config_dir: PathBuf,
    pub api_base: String,
    pub event_queue_capacity: usize,
}

impl SessionOptions {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            config_dir: PathBuf::from("."),
            api_base: DEFAULT_API_BASE.into(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        BridgeConfig::path(&self.config_dir, &self.instance_id)
    }
}
