//! State change notifications.
//!
//! Every mutation of the store that actually changes a channel is
//! broadcast as a [`StateChange`], whether it came from a local request or
//! from the unit.

use preamp_protocol::ChannelConfig;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// A local `set` before the command was sent.
    Local,
    /// A frame decoded from the unit.
    Device,
}

/// One channel changing from `previous` to `current`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// Channel id.
    pub channel: u8,
    /// Configuration before the change.
    pub previous: ChannelConfig,
    /// Configuration after the change.
    pub current: ChannelConfig,
    /// Origin of the change.
    pub source: ChangeSource,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl StateChange {
    /// Create a change stamped with the current time.
    #[must_use]
    pub fn new(previous: ChannelConfig, current: ChannelConfig, source: ChangeSource) -> Self {
        Self {
            channel: current.channel_id,
            previous,
            current,
            source,
            timestamp: now_millis(),
        }
    }

    /// Whether the active gain moved.
    #[must_use]
    pub fn gain_changed(&self) -> bool {
        self.previous.input != self.current.input
            || self.previous.active_gain() != self.current.active_gain()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use preamp_protocol::InputSource;

    #[test]
    fn test_change_creation() {
        let before = ChannelConfig::new(3);
        let after = before.with_gain(40);
        let change = StateChange::new(before, after, ChangeSource::Device);

        assert_eq!(change.channel, 3);
        assert!(change.gain_changed());
        assert!(change.timestamp > 0);
    }

    #[test]
    fn test_inactive_gain_is_not_a_gain_change() {
        let before = ChannelConfig::new(1);
        let mut after = before;
        after.set_gain(InputSource::Di, 90);

        let change = StateChange::new(before, after, ChangeSource::Local);
        assert!(!change.gain_changed());
    }

    #[test]
    fn test_change_serializes_source() {
        let config = ChannelConfig::new(0);
        let change = StateChange::new(config, config, ChangeSource::Local);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["source"], "local");
        assert_eq!(json["current"]["input"], "mic");
    }
}
