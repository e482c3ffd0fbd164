use serde::{Deserialize, Deserializer, Serialize};

/// Media class of an attachment as the hub understands it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttachmentKind {
    #[default]
    Image,
    File,
    Audio,
    Video,
}

/// Remote file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    #[serde(rename = "type", default)]
    pub kind: AttachmentKind,
    pub source_url: String,
    /// Platform-side attachment ID, when the attachment originates there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
}

impl AttachmentRef {
    pub fn image(source_url: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            source_url: source_url.into(),
            origin_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HubAuthor {
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avatar_url: String,
}

/// A hub message addressed to a platform channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundHubMessage {
    pub target_channel_id: String,
    pub author: HubAuthor,
    pub body: String,
    pub attachments: Vec<AttachmentRef>,
}

/// A platform message forwarded into the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedMessage {
    pub content: String,
    pub origin_message_id: String,
    pub origin_channel_id: String,
    pub author_username: String,
    pub author_origin_id: String,
    pub author_avatar_url: String,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
}

/// One candidate channel in a search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(rename = "name")]
    pub display_name: String,
    pub icon_url: String,
    pub origin_id: String,
}

/// A single field of a service configuration schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationField {
    #[serde(rename = "type")]
    pub field_type: String,
    pub hint: String,
    pub default_value: String,
    pub optional: bool,
    pub mask: bool,
}

impl ConfigurationField {
    /// A required string field.
    pub fn string(hint: impl Into<String>) -> Self {
        Self {
            field_type: "STRING".into(),
            hint: hint.into(),
            default_value: String::new(),
            optional: false,
            mask: false,
        }
    }

    #[must_use]
    pub fn masked(mut self) -> Self {
        self.mask = true;
        self
    }
}

// ── Wire shapes ─────────────────────────────────────────────────────────────

/// `messageReceived` subscription payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageReceivedPayload {
    pub target_thread_id: String,
    pub message: MessagePayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author: HubAuthor,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<AttachmentRef>,
}

// The hub sends explicit `null` for unset optional fields.
fn null_as_default<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<MessageReceivedPayload> for InboundHubMessage {
    fn from(payload: MessageReceivedPayload) -> Self {
        Self {
            target_channel_id: payload.target_thread_id,
            author: payload.message.author,
            body: payload.message.body,
            attachments: payload.message.attachments,
        }
    }
}

/// `configurationReceived` subscription payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigurationPayload {
    pub field_values: Vec<String>,
}

/// `sendMessage` input object.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageInput<'a> {
    pub body: &'a str,
    pub origin_id: &'a str,
    pub origin_thread_id: &'a str,
    pub author: AuthorInput<'a>,
    pub attachments: &'a [AttachmentRef],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthorInput<'a> {
    pub username: &'a str,
    pub origin_id: &'a str,
    pub avatar_url: &'a str,
}

impl<'a> From<&'a ForwardedMessage> for MessageInput<'a> {
    fn from(message: &'a ForwardedMessage) -> Self {
        Self {
            body: &message.content,
            origin_id: &message.origin_message_id,
            origin_thread_id: &message.origin_channel_id,
            author: AuthorInput {
                username: &message.author_username,
                origin_id: &message.author_origin_id,
                avatar_url: &message.author_avatar_url,
            },
            attachments: &message.attachments,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn message_received_maps_to_inbound_message() {
        let payload: MessageReceivedPayload = serde_json::from_value(json!({
            "targetThreadId": "123",
            "message": {
                "body": "hi",
                "author": { "username": "alice", "avatarUrl": "https://a/x.png" },
                "attachments": [{ "type": "IMAGE", "sourceUrl": "https://a/cat.png" }]
            }
        }))
        .unwrap();

        let msg = InboundHubMessage::from(payload);
        assert_eq!(msg.target_channel_id, "123");
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.author.username, "alice");
        assert_eq!(msg.attachments, vec![AttachmentRef::image("https://a/cat.png")]);
    }

    #[test]
    fn missing_message_fields_default() {
        let payload: MessageReceivedPayload = serde_json::from_value(json!({
            "targetThreadId": "9",
            "message": {}
        }))
        .unwrap();
        let msg = InboundHubMessage::from(payload);
        assert!(msg.body.is_empty());
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn explicit_nulls_fall_back_to_empty() {
        let payload: MessageReceivedPayload = serde_json::from_value(json!({
            "targetThreadId": "9",
            "message": {
                "body": null,
                "author": { "username": "alice", "avatarUrl": null },
                "attachments": null
            }
        }))
        .unwrap();
        let msg = InboundHubMessage::from(payload);
        assert!(msg.body.is_empty());
        assert_eq!(msg.author.username, "alice");
        assert!(msg.author.avatar_url.is_empty());
        assert!(msg.attachments.is_empty());

        let payload: MessageReceivedPayload = serde_json::from_value(json!({
            "targetThreadId": "9",
            "message": { "body": "hi", "author": null }
        }))
        .unwrap();
        assert_eq!(InboundHubMessage::from(payload).author, HubAuthor::default());
    }

    #[test]
    fn search_result_uses_hub_field_names() {
        let value = serde_json::to_value(SearchResult {
            display_name: "Guild - general".into(),
            icon_url: String::new(),
            origin_id: "42".into(),
        })
        .unwrap();
        assert_eq!(value["name"], "Guild - general");
        assert_eq!(value["originId"], "42");
    }

    #[test]
    fn masked_string_field_serializes() {
        let value =
            serde_json::to_value(ConfigurationField::string("Your Discord bot token").masked())
                .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "STRING",
                "hint": "Your Discord bot token",
                "defaultValue": "",
                "optional": false,
                "mask": true
            })
        );
    }
}
