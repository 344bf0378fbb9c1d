//! Mesh relay envelopes
//!
//! Mesh nodes are out of the broker's reach. Commands for them go to the
//! coordinator wrapped in a `Publish` envelope, and the coordinator
//! rebroadcasts the payload over the radio.

use crate::error::{GatewayError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Destination key the coordinator reads from structured payloads
const DESTINATION_KEY: &str = "D";

#[derive(Serialize)]
struct PublishEnvelope {
    #[serde(rename = "Command")]
    command: &'static str,
    #[serde(rename = "Payload")]
    payload: String,
}

/// Wrap `command` for relay to `destination` through the coordinator.
///
/// JSON commands get a `"D"` key naming the destination and travel as a
/// JSON string. Anything else (sealed commands) travels hex encoded behind
/// an `h` marker.
pub fn build_envelope(destination: &str, command: &[u8]) -> Result<Vec<u8>> {
    let address = format!("dst-{destination}");

    let payload = if command.first() == Some(&b'{') {
        let mut fields: Map<String, Value> = serde_json::from_slice(command)
            .map_err(|e| GatewayError::Validation(format!("command is not a JSON object: {e}")))?;
        fields.insert(DESTINATION_KEY.to_string(), Value::String(address));

        serde_json::to_string(&fields)
            .map_err(|e| GatewayError::Validation(format!("unable to encode command: {e}")))?
    } else {
        let mut raw = address.into_bytes();
        raw.extend_from_slice(command);
        format!("h{}", hex::encode(raw))
    };

    serde_json::to_vec(&PublishEnvelope {
        command: "Publish",
        payload,
    })
    .map_err(|e| GatewayError::Validation(format!("unable to encode envelope: {e}")))
}

/// What a new mesh node needs to join: the shared key, the coordinator's
/// radio address and its channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeshInfo {
    pub key: String,
    pub controller: String,
    pub channel: i32,
}
