//! In-memory hub used by unit tests.

use std::sync::Mutex;

use {
    async_trait::async_trait,
    chatplug_hub::{
        ConfigurationField, ForwardedMessage, Hub, InboundHubMessage, SearchRequest, SearchResult,
    },
    tokio::sync::mpsc,
};

#[derive(Default)]
pub(crate) struct FakeHub {
    pub sent: Mutex<Vec<ForwardedMessage>>,
    pub search_responses: Mutex<Vec<(String, Vec<SearchResult>)>>,
    pub published_schema: Mutex<Option<Vec<ConfigurationField>>>,
    pub config_values: Mutex<Option<Vec<String>>>,
    pub fail_send: bool,
}

impl FakeHub {
    pub fn sent(&self) -> Vec<ForwardedMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Hub for FakeHub {
    // Subscriptions are exercised against a real socket in the hub crate.
    async fn subscribe_messages(&self) -> chatplug_hub::Result<mpsc::Receiver<InboundHubMessage>> {
        Err(chatplug_hub::Error::SubscriptionClosed)
    }

    async fn subscribe_search_requests(
        &self,
    ) -> chatplug_hub::Result<mpsc::Receiver<SearchRequest>> {
        Err(chatplug_hub::Error::SubscriptionClosed)
    }

    async fn send_message(&self, message: ForwardedMessage) -> chatplug_hub::Result<()> {
        if self.fail_send {
            return Err(chatplug_hub::Error::GraphQl {
                message: "hub rejected message".into(),
            });
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn set_search_response(
        &self,
        query: &str,
        results: Vec<SearchResult>,
    ) -> chatplug_hub::Result<()> {
        self.search_responses
            .lock()
            .unwrap()
            .push((query.to_string(), results));
        Ok(())
    }

    async fn await_configuration(
        &self,
        fields: Vec<ConfigurationField>,
    ) -> chatplug_hub::Result<Vec<String>> {
        *self.published_schema.lock().unwrap() = Some(fields);
        self.config_values
            .lock()
            .unwrap()
            .take()
            .ok_or(chatplug_hub::Error::SubscriptionClosed)
    }
}
