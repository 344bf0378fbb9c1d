pub mod mqtt;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use mqtt::MqttTransport;
pub use traits::{InboundMessage, QoS, Transport, TransportError};
