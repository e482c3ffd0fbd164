use std::{path::PathBuf, sync::Arc};

use {
    chatplug_discord::{BridgeSession, SessionOptions, config::DEFAULT_API_BASE},
    chatplug_hub::GraphqlHub,
    clap::Parser,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "chatplug-discord",
    about = "Bridges a ChatPlug hub instance to Discord",
    version
)]
struct Cli {
    /// Service instance ID assigned by the hub.
    #[arg(long, env = "INSTANCE_ID")]
    instance_id: String,

    /// Hub GraphQL endpoint for queries and mutations.
    #[arg(long, env = "HTTP_ENDPOINT")]
    http_endpoint: String,

    /// Hub GraphQL endpoint for subscriptions.
    #[arg(long, env = "WS_ENDPOINT")]
    ws_endpoint: String,

    /// Directory holding `config.<instance>.json`.
    #[arg(long, env = "CHATPLUG_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Discord REST API base URL.
    #[arg(long, env = "DISCORD_API_BASE", default_value = DEFAULT_API_BASE)]
    discord_api_base: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn shutdown_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance_id = %cli.instance_id,
        "chatplug-discord starting"
    );

    let hub = Arc::new(GraphqlHub::new(
        cli.instance_id.clone(),
        cli.http_endpoint,
        cli.ws_endpoint,
    ));

    let mut options = SessionOptions::new(cli.instance_id);
    options.config_dir = cli.config_dir;
    options.api_base = cli.discord_api_base;

    let cancel = CancellationToken::new();
    shutdown_on_ctrl_c(cancel.clone());

    if let Err(e) = BridgeSession::new(hub, options).run(cancel).await {
        error!(error = %e, fatal = e.is_fatal(), "chatplug-discord failed");
        return Err(e.into());
    }
    info!("chatplug-discord stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "chatplug-discord",
            "--instance-id",
            "abc",
            "--http-endpoint",
            "http://localhost:2137/query",
            "--ws-endpoint",
            "ws://localhost:2137/query",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(cli.instance_id, "abc");
        assert_eq!(cli.config_dir, PathBuf::from("."));
        assert_eq!(cli.discord_api_base, DEFAULT_API_BASE);
        assert!(cli.json_logs);
    }
}
