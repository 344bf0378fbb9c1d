//! MQTT transport over rumqttc

use super::traits::{InboundMessage, QoS, Transport, TransportError};
use crate::config::MqttConfig;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace, warn};

/// Capacity of the client's outbound request queue
const REQUEST_CAPACITY: usize = 64;

type Subscriptions = Arc<Mutex<Vec<(String, rumqttc::QoS)>>>;

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Broker connection. A background task drives the event loop, forwards
/// inbound publishes and restores subscriptions after every reconnect.
pub struct MqttTransport {
    client: AsyncClient,
    subscriptions: Subscriptions,
}

impl MqttTransport {
    /// Start the connection and return the inbound message channel
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let subscriptions: Subscriptions = Arc::new(Mutex::new(Vec::new()));

        info!("[mqtt] connecting to {}:{}", config.host, config.port);

        tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            subscriptions.clone(),
            tx,
            config.reconnect_delay(),
        ));

        (
            Self {
                client,
                subscriptions,
            },
            rx,
        )
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Subscriptions,
    tx: mpsc::Sender<InboundMessage>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("[mqtt] connected");
                // Clean sessions drop subscriptions on reconnect
                for (topic, qos) in subscriptions.lock().await.iter() {
                    if let Err(e) = client.try_subscribe(topic.as_str(), *qos) {
                        warn!("[mqtt] unable to resubscribe to {}: {}", topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(
                    "[mqtt] received {} bytes on {}",
                    publish.payload.len(),
                    publish.topic
                );
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if tx.send(message).await.is_err() {
                    debug!("[mqtt] inbound channel closed, stopping event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!("[mqtt] subscription acknowledged: pkid={}", ack.pkid);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[mqtt] connection error: {}", e);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        trace!("[mqtt] publishing {} bytes to {}", payload.len(), topic);
        self.client
            .publish(topic, to_mqtt_qos(qos), retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        let qos = to_mqtt_qos(qos);
        self.subscriptions
            .lock()
            .await
            .push((pattern.to_string(), qos));

        self.client
            .subscribe(pattern, qos)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "MQTT"
    }
}
