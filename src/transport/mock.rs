//! Recording transport for tests

use super::traits::{QoS, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl Published {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Default)]
pub struct MockTransport {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
    /// Every publish stalls this long before completing
    delay: Option<Duration>,
    fail: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stalled(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn published(&self) -> Vec<Published> {
        self.published.lock().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        _qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "broker unavailable".into(),
            });
        }

        self.published.lock().await.push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, _qos: QoS) -> Result<(), TransportError> {
        self.subscriptions.lock().await.push(pattern.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
