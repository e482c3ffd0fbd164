//! GraphQL transport for the ChatPlug hub.
//!
//! Mutations go over plain HTTP. Subscriptions use the `graphql-ws`
//! WebSocket subprotocol, one socket per subscription, each pumped by its own
//! task into a bounded channel.

use std::time::Duration;

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tokio::sync::mpsc,
    tokio_tungstenite::{
        connect_async,
        tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
    },
    tracing::{debug, info, warn},
};

use crate::{
    Hub,
    error::{Error, Result},
    types::{
        ConfigurationField, ConfigurationPayload, ForwardedMessage, InboundHubMessage,
        MessageInput, MessageReceivedPayload, SearchRequest, SearchResult,
    },
};

/// Capacity of each subscription's item channel.
const SUBSCRIPTION_BUFFER: usize = 64;

/// How long the hub has to acknowledge `connection_init`.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

const MESSAGE_RECEIVED: &str = r#"subscription MessageReceived($instanceId: String!) {
  messageReceived(instanceId: $instanceId) {
    targetThreadId
    message {
      body
      author { username avatarUrl }
      attachments { type sourceUrl }
    }
  }
}"#;

const SEARCH_REQUESTED: &str = r#"subscription SearchRequested($instanceId: String!) {
  searchRequested(instanceId: $instanceId) { query }
}"#;

const CONFIGURATION_RECEIVED: &str = r#"subscription ConfigurationReceived($instanceId: String!) {
  configurationReceived(instanceId: $instanceId) { fieldValues }
}"#;

const SEND_MESSAGE: &str = r#"mutation SendMessage($instanceId: String!, $input: MessageInput!) {
  sendMessage(instanceId: $instanceId, input: $input) { id }
}"#;

const SET_SEARCH_RESPONSE: &str = r#"mutation SetSearchResponse($instanceId: String!, $forQuery: String!, $threads: [ThreadSearchResultInput!]!) {
  setSearchResponse(instanceId: $instanceId, forQuery: $forQuery, threads: $threads) { forQuery }
}"#;

const SET_INSTANCE_SCHEMA: &str = r#"mutation SetInstanceSchema($instanceId: String!, $schema: ConfigurationSchemaInput!) {
  setInstanceSchema(instanceId: $instanceId, schema: $schema) { id }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

fn join_errors(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Hub client for a single service instance.
pub struct GraphqlHub {
    http: reqwest::Client,
    http_endpoint: String,
    ws_endpoint: String,
    instance_id: String,
    ack_timeout: Duration,
}

impl GraphqlHub {
    pub fn new(
        instance_id: impl Into<String>,
        http_endpoint: impl Into<String>,
        ws_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            http_endpoint: http_endpoint.into(),
            ws_endpoint: ws_endpoint.into(),
            instance_id: instance_id.into(),
            ack_timeout: ACK_TIMEOUT,
        }
    }

    async fn execute(&self, query: &str, variables: Value) -> Result<Value> {
        let resp = self
            .http
            .post(&self.http_endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;

        let body: GraphQlResponse = resp.json().await?;
        if let Some(errors) = body.errors.as_deref()
            && !errors.is_empty()
        {
            return Err(Error::GraphQl {
                message: join_errors(errors),
            });
        }
        Ok(body.data.unwrap_or(Value::Null))
    }

    async fn subscribe<T>(&self, query: &'static str, field: &'static str) -> Result<mpsc::Receiver<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut request = self.ws_endpoint.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("graphql-ws"));

        let (ws_stream, _response) = connect_async(request).await?;
        let (mut ws_sink, mut ws_reader) = ws_stream.split();

        let init = json!({ "type": "connection_init", "payload": {} });
        ws_sink.send(Message::Text(init.to_string().into())).await?;

        tokio::time::timeout(self.ack_timeout, async {
            while let Some(msg) = ws_reader.next().await {
                if let Message::Text(text) = msg? {
                    match decode_frame(&text)? {
                        Frame::Ack => return Ok::<(), Error>(()),
                        Frame::Error(message) => return Err(Error::protocol(message)),
                        _ => {},
                    }
                }
            }
            Err(Error::SubscriptionClosed)
        })
        .await
        .map_err(|_| Error::protocol("hub did not acknowledge connection_init"))??;

        let start = json!({
            "id": "1",
            "type": "start",
            "payload": {
                "query": query,
                "variables": { "instanceId": self.instance_id },
            },
        });
        ws_sink.send(Message::Text(start.to_string().into())).await?;
        info!(field, "hub subscription started");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(data)) => {
                        if ws_sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(field, error = %e, "hub subscription socket failed");
                        break;
                    },
                };

                match decode_frame(&text) {
                    Ok(Frame::Data(payload)) => match extract_field::<T>(payload, field) {
                        Ok(item) => {
                            if tx.send(item).await.is_err() {
                                break;
                            }
                        },
                        Err(e) => warn!(field, error = %e, "skipping undecodable hub payload"),
                    },
                    Ok(Frame::Error(message)) => {
                        warn!(field, reason = %message, "hub rejected subscription");
                        break;
                    },
                    Ok(Frame::Complete) => break,
                    Ok(Frame::Ack | Frame::KeepAlive | Frame::Other) => {},
                    Err(e) => warn!(field, error = %e, "skipping malformed hub frame"),
                }
            }
            debug!(field, "hub subscription ended");
        });

        Ok(rx)
    }
}

#[async_trait]
impl Hub for GraphqlHub {
    async fn subscribe_messages(&self) -> Result<mpsc::Receiver<InboundHubMessage>> {
        let mut raw = self
            .subscribe::<MessageReceivedPayload>(MESSAGE_RECEIVED, "messageReceived")
            .await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            while let Some(payload) = raw.recv().await {
                if tx.send(InboundHubMessage::from(payload)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn subscribe_search_requests(&self) -> Result<mpsc::Receiver<SearchRequest>> {
        self.subscribe(SEARCH_REQUESTED, "searchRequested").await
    }

    async fn send_message(&self, message: ForwardedMessage) -> Result<()> {
        let input = MessageInput::from(&message);
        self.execute(
            SEND_MESSAGE,
            json!({ "instanceId": self.instance_id, "input": input }),
        )
        .await?;
        Ok(())
    }

    async fn set_search_response(&self, query: &str, results: Vec<SearchResult>) -> Result<()> {
        self.execute(
            SET_SEARCH_RESPONSE,
            json!({
                "instanceId": self.instance_id,
                "forQuery": query,
                "threads": results,
            }),
        )
        .await?;
        Ok(())
    }

    async fn await_configuration(&self, fields: Vec<ConfigurationField>) -> Result<Vec<String>> {
        // Subscribe before publishing so a fast answer is not missed.
        let mut rx = self
            .subscribe::<ConfigurationPayload>(CONFIGURATION_RECEIVED, "configurationReceived")
            .await?;
        self.execute(
            SET_INSTANCE_SCHEMA,
            json!({
                "instanceId": self.instance_id,
                "schema": { "fields": fields },
            }),
        )
        .await?;
        info!(
            instance_id = %self.instance_id,
            "configuration schema published, waiting for values"
        );

        let payload = rx.recv().await.ok_or(Error::SubscriptionClosed)?;
        Ok(payload.field_values)
    }
}

/// A decoded server frame of the `graphql-ws` protocol.
#[derive(Debug, PartialEq)]
enum Frame {
    Ack,
    KeepAlive,
    Data(Value),
    Error(String),
    Complete,
    Other,
}

#[derive(Debug, Deserialize)]
struct ServerFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

fn decode_frame(text: &str) -> Result<Frame> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    Ok(match frame.kind.as_str() {
        "connection_ack" => Frame::Ack,
        "ka" => Frame::KeepAlive,
        "data" => Frame::Data(frame.payload.unwrap_or(Value::Null)),
        "error" | "connection_error" => Frame::Error(
            frame
                .payload
                .map(|p| describe_error_payload(&p))
                .unwrap_or_else(|| "unknown error".into()),
        ),
        "complete" => Frame::Complete,
        _ => Frame::Other,
    })
}

fn describe_error_payload(payload: &Value) -> String {
    if let Ok(errors) = serde_json::from_value::<Vec<GraphQlError>>(payload.clone()) {
        return join_errors(&errors);
    }
    payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| payload.to_string())
}

/// Pull `data.<field>` out of a `data` frame payload.
fn extract_field<T: DeserializeOwned>(payload: Value, field: &str) -> Result<T> {
    let response: GraphQlResponse = serde_json::from_value(payload)?;
    if let Some(errors) = response.errors.as_deref()
        && !errors.is_empty()
    {
        return Err(Error::GraphQl {
            message: join_errors(errors),
        });
    }
    let item = response
        .data
        .and_then(|mut data| data.get_mut(field).map(Value::take))
        .ok_or_else(|| Error::protocol(format!("data frame missing `{field}`")))?;
    Ok(serde_json::from_value(item)?)
}
