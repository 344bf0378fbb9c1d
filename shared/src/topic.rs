//! MQTT topic layout
//!
//! Garden systems publish under `garden/module`:
//! ```text
//! garden/module/discovery/<id>        retained announcement
//! garden/module/<id>/tele/<kind>      telemetry (data, networks, packet, ping, mesh, ota)
//! garden/module/<id>/cmnd             commands addressed to a system
//! ```

use std::fmt;

/// Prefix shared by every garden topic
pub const TOPIC_ROOT: &str = "garden/module";

/// Subscription covering every discovery announcement
pub const DISCOVERY_SUBSCRIPTION: &str = "garden/module/discovery/+";

/// Subscription covering every telemetry message
pub const TELEMETRY_SUBSCRIPTION: &str = "garden/module/+/tele/#";

/// What an inbound message is, judged from its topic alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Discovery,
    TelemetryData,
    TelemetryNetworks,
    TelemetryPacket,
    TelemetryPing,
    TelemetryMesh,
    TelemetryOta,
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Discovery => "discovery",
            MessageKind::TelemetryData => "telemetry-data",
            MessageKind::TelemetryNetworks => "telemetry-networks",
            MessageKind::TelemetryPacket => "telemetry-packet",
            MessageKind::TelemetryPing => "telemetry-ping",
            MessageKind::TelemetryMesh => "telemetry-mesh",
            MessageKind::TelemetryOta => "telemetry-ota",
            MessageKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a topic by its discovery marker or telemetry suffix
pub fn classify(topic: &str) -> MessageKind {
    if topic.contains("/discovery") {
        return MessageKind::Discovery;
    }

    if !topic.contains("/tele/") {
        return MessageKind::Unknown;
    }

    match topic.rsplit('/').next() {
        Some("data") => MessageKind::TelemetryData,
        Some("networks") => MessageKind::TelemetryNetworks,
        Some("packet") => MessageKind::TelemetryPacket,
        Some("ping") => MessageKind::TelemetryPing,
        Some("mesh") => MessageKind::TelemetryMesh,
        Some("ota") => MessageKind::TelemetryOta,
        _ => MessageKind::Unknown,
    }
}

/// Extract the sending system from `garden/module/<hex-id>/...`.
///
/// Anything else, discovery announcements included, has no sender id.
pub fn sender_id(topic: &str) -> Option<&str> {
    let mut segments = topic.split('/');

    if segments.next() != Some("garden") || segments.next() != Some("module") {
        return None;
    }

    let id = segments.next()?;
    // The id must be followed by at least one more segment
    segments.next()?;

    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(id)
    } else {
        None
    }
}

/// Recover the originating system from a topic carried inside a mesh packet.
///
/// Telemetry topics name the system right after `module`; discovery topics
/// name it in the final segment.
pub fn mesh_sender_id(topic: &str) -> Option<&str> {
    let segments: Vec<&str> = topic.split('/').collect();

    let id = if topic.contains("/tele/") {
        segments
            .iter()
            .position(|s| *s == "module")
            .and_then(|i| segments.get(i + 1))
            .copied()
    } else {
        segments.last().copied()
    };

    id.filter(|id| !id.is_empty())
}

/// Last segment of a topic, which names the system on discovery topics
pub fn last_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

pub fn discovery_topic(id: &str) -> String {
    format!("{TOPIC_ROOT}/discovery/{id}")
}

pub fn telemetry_topic(id: &str, kind: &str) -> String {
    format!("{TOPIC_ROOT}/{id}/tele/{kind}")
}

pub fn command_topic(id: &str) -> String {
    format!("{TOPIC_ROOT}/{id}/cmnd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let id = "84cca8abcdef";
        assert_eq!(classify(&discovery_topic(id)), MessageKind::Discovery);
        assert_eq!(classify(&telemetry_topic(id, "data")), MessageKind::TelemetryData);
        assert_eq!(classify(&telemetry_topic(id, "networks")), MessageKind::TelemetryNetworks);
        assert_eq!(classify(&telemetry_topic(id, "packet")), MessageKind::TelemetryPacket);
        assert_eq!(classify(&telemetry_topic(id, "ping")), MessageKind::TelemetryPing);
        assert_eq!(classify(&telemetry_topic(id, "mesh")), MessageKind::TelemetryMesh);
        assert_eq!(classify(&telemetry_topic(id, "ota")), MessageKind::TelemetryOta);
        assert_eq!(classify(&telemetry_topic(id, "weather")), MessageKind::Unknown);
        assert_eq!(classify(&command_topic(id)), MessageKind::Unknown);
        assert_eq!(classify(""), MessageKind::Unknown);
    }

    #[test]
    fn test_sender_id() {
        assert_eq!(sender_id("garden/module/84cca8abcdef/tele/data"), Some("84cca8abcdef"));
        assert_eq!(sender_id("garden/module/ABCDEF/cmnd"), Some("ABCDEF"));
        assert_eq!(sender_id("garden/module/discovery/84cca8abcdef"), None);
        assert_eq!(sender_id("garden/module/84cca8abcdef"), None);
        assert_eq!(sender_id("other/module/84cca8abcdef/tele/data"), None);
    }

    #[test]
    fn test_mesh_sender_id() {
        assert_eq!(
            mesh_sender_id("garden/module/84cca8abcdef/tele/data"),
            Some("84cca8abcdef")
        );
        assert_eq!(
            mesh_sender_id("garden/module/discovery/84cca8abcdef"),
            Some("84cca8abcdef")
        );
        assert_eq!(mesh_sender_id(""), None);
    }
}
