//! Frame-level types for the preamp protocol.
//!
//! A channel's analog front end is described by a [`ChannelConfig`]. The
//! codec turns it into a command frame, and inbound frames come back as a
//! [`DecodedEvent`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hardware channels on the unit.
pub const CHANNEL_COUNT: u8 = 8;

/// Highest mic gain the unit accepts.
pub const MAX_MIC_GAIN: u8 = 70;

/// Highest line gain the unit accepts.
pub const MAX_LINE_GAIN: u8 = 60;

/// Highest DI gain the unit accepts.
pub const MAX_DI_GAIN: u8 = 255;

/// Bits of the 32-bit settings field.
pub mod settings {
    pub const PHANTOM: u32 = 0x0000_0001;
    pub const PAD: u32 = 0x0000_0100;
    pub const LOW_Z: u32 = 0x0001_0000;
    pub const INPUT_LINE: u32 = 0x0100_0000;
    pub const INPUT_DI: u32 = 0x0200_0000;
}

/// Selected input source of a channel.
///
/// Mic is the implicit default on the wire: it sets no input bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    #[default]
    Mic,
    Line,
    Di,
}

impl InputSource {
    /// All input sources, in wire bit order.
    pub const ALL: [InputSource; 3] = [InputSource::Mic, InputSource::Line, InputSource::Di];

    /// Upper bound of this input's gain range.
    #[must_use]
    pub const fn max_gain(self) -> u8 {
        match self {
            InputSource::Mic => MAX_MIC_GAIN,
            InputSource::Line => MAX_LINE_GAIN,
            InputSource::Di => MAX_DI_GAIN,
        }
    }

    /// Clamp a requested gain into this input's range.
    ///
    /// Out-of-range requests are never rejected: `-5` becomes `0` and
    /// anything above the maximum becomes the maximum.
    #[must_use]
    pub fn clamp_gain(self, value: i32) -> u8 {
        // max_gain() <= 255, so the cast cannot truncate
        value.clamp(0, i32::from(self.max_gain())) as u8
    }

    /// Settings bits selecting this input.
    #[must_use]
    pub const fn settings_bits(self) -> u32 {
        match self {
            InputSource::Mic => 0,
            InputSource::Line => settings::INPUT_LINE,
            InputSource::Di => settings::INPUT_DI,
        }
    }

    /// Recover the input from a settings field. DI wins if both input bits are set.
    #[must_use]
    pub const fn from_settings(bits: u32) -> Self {
        if bits & settings::INPUT_DI != 0 {
            InputSource::Di
        } else if bits & settings::INPUT_LINE != 0 {
            InputSource::Line
        } else {
            InputSource::Mic
        }
    }

    /// Name used in config files and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            InputSource::Mic => "mic",
            InputSource::Line => "line",
            InputSource::Di => "di",
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mic" => Ok(InputSource::Mic),
            "line" => Ok(InputSource::Line),
            "di" => Ok(InputSource::Di),
            other => Err(format!("unknown input source '{other}' (expected mic, line or di)")),
        }
    }
}

/// Physical connector routing of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    #[default]
    Front,
    Back,
}

impl Connection {
    /// Value of the 4-byte operation flag for this routing.
    #[must_use]
    pub const fn operation_flag(self) -> u32 {
        match self {
            Connection::Front => 1,
            Connection::Back => 0,
        }
    }

    /// Front iff the flag is exactly 1.
    #[must_use]
    pub const fn from_operation_flag(flag: u32) -> Self {
        if flag == 1 {
            Connection::Front
        } else {
            Connection::Back
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Connection::Front => "front",
            Connection::Back => "back",
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Connection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(Connection::Front),
            "back" => Ok(Connection::Back),
            other => Err(format!("unknown connection '{other}' (expected front or back)")),
        }
    }
}

/// Analog front-end state of one channel.
///
/// All three gains are kept regardless of `input`; only the one matching
/// the input is active on the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Hardware channel, 0–7 for a valid command.
    pub channel_id: u8,
    /// 48V phantom power. Only honoured on mic input.
    pub phantom: bool,
    /// Attenuation pad.
    pub pad: bool,
    /// Low-impedance input mode.
    pub low_z: bool,
    /// Selected input source.
    pub input: InputSource,
    /// Front or back connector.
    pub connection: Connection,
    /// Mic gain, 0–70.
    pub mic_gain: u8,
    /// Line gain, 0–60.
    pub line_gain: u8,
    /// DI gain, 0–255.
    pub di_gain: u8,
}

impl ChannelConfig {
    /// Default configuration for a channel.
    #[must_use]
    pub fn new(channel_id: u8) -> Self {
        Self {
            channel_id,
            ..Self::default()
        }
    }

    /// Select the input source.
    #[must_use]
    pub fn with_input(mut self, input: InputSource) -> Self {
        self.input = input;
        self
    }

    /// Select the connector.
    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = connection;
        self
    }

    /// Set the gain of the currently selected input, clamped to its range.
    #[must_use]
    pub fn with_gain(mut self, gain: i32) -> Self {
        self.set_gain(self.input, gain);
        self
    }

    /// Gain stored for `input`.
    #[must_use]
    pub fn gain(&self, input: InputSource) -> u8 {
        match input {
            InputSource::Mic => self.mic_gain,
            InputSource::Line => self.line_gain,
            InputSource::Di => self.di_gain,
        }
    }

    /// Gain of the currently selected input.
    #[must_use]
    pub fn active_gain(&self) -> u8 {
        self.gain(self.input)
    }

    /// Store a clamped gain for `input`, leaving the other two untouched.
    pub fn set_gain(&mut self, input: InputSource, gain: i32) {
        let value = input.clamp_gain(gain);
        match input {
            InputSource::Mic => self.mic_gain = value,
            InputSource::Line => self.line_gain = value,
            InputSource::Di => self.di_gain = value,
        }
    }

    /// Whether phantom power actually reaches the wire.
    #[must_use]
    pub fn phantom_effective(&self) -> bool {
        self.phantom && self.input == InputSource::Mic
    }

    /// Whether the channel id addresses a real channel.
    #[must_use]
    pub fn is_valid_channel(&self) -> bool {
        self.channel_id < CHANNEL_COUNT
    }

    /// The 32-bit settings field for this config.
    #[must_use]
    pub fn settings_bits(&self) -> u32 {
        let mut bits = self.input.settings_bits();
        if self.phantom_effective() {
            bits |= settings::PHANTOM;
        }
        if self.pad {
            bits |= settings::PAD;
        }
        if self.low_z {
            bits |= settings::LOW_Z;
        }
        bits
    }

    /// This config as the wire carries it: gains clamped, phantom dropped off mic.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            phantom: self.phantom_effective(),
            mic_gain: self.mic_gain.min(MAX_MIC_GAIN),
            line_gain: self.line_gain.min(MAX_LINE_GAIN),
            di_gain: self.di_gain.min(MAX_DI_GAIN),
            ..*self
        }
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedEvent {
    /// The unit answered a poll with nothing to report.
    Idle,
    /// The unit reported the state of one channel. The id may be out of range.
    ChannelUpdate(ChannelConfig),
    /// Like `ChannelUpdate`, but only the active input's gain was on the
    /// wire. The inactive gains carry no information.
    ActiveGainUpdate(ChannelConfig),
    /// Bytes that match no known frame shape.
    Unrecognized,
}

impl DecodedEvent {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedEvent::Idle => "idle",
            DecodedEvent::ChannelUpdate(_) => "channel_update",
            DecodedEvent::ActiveGainUpdate(_) => "active_gain_update",
            DecodedEvent::Unrecognized => "unrecognized",
        }
    }

    /// The reported channel config, for either kind of update.
    #[must_use]
    pub fn reported(&self) -> Option<&ChannelConfig> {
        match self {
            DecodedEvent::ChannelUpdate(config) | DecodedEvent::ActiveGainUpdate(config) => {
                Some(config)
            }
            DecodedEvent::Idle | DecodedEvent::Unrecognized => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_gain_bounds() {
        assert_eq!(InputSource::Mic.clamp_gain(-5), 0);
        assert_eq!(InputSource::Mic.clamp_gain(300), 70);
        assert_eq!(InputSource::Line.clamp_gain(300), 60);
        assert_eq!(InputSource::Di.clamp_gain(300), 255);
        assert_eq!(InputSource::Di.clamp_gain(i32::MIN), 0);
        assert_eq!(InputSource::Line.clamp_gain(42), 42);
    }

    #[test]
    fn test_clamp_gain_idempotent() {
        for input in InputSource::ALL {
            for raw in [-1000, -5, -1, 0, 1, 59, 60, 61, 70, 71, 128, 255, 256, 300, 9999] {
                let once = input.clamp_gain(raw);
                assert_eq!(input.clamp_gain(i32::from(once)), once);
            }
        }
    }

    #[test]
    fn test_input_from_settings_di_wins() {
        assert_eq!(InputSource::from_settings(0), InputSource::Mic);
        assert_eq!(
            InputSource::from_settings(settings::INPUT_LINE),
            InputSource::Line
        );
        assert_eq!(
            InputSource::from_settings(settings::INPUT_LINE | settings::INPUT_DI),
            InputSource::Di
        );
    }

    #[test]
    fn test_settings_bits_drop_phantom_off_mic() {
        let mut config = ChannelConfig::new(0);
        config.phantom = true;
        config.pad = true;
        assert_eq!(config.settings_bits(), settings::PHANTOM | settings::PAD);

        config.input = InputSource::Line;
        assert_eq!(config.settings_bits(), settings::PAD | settings::INPUT_LINE);

        config.input = InputSource::Di;
        config.low_z = true;
        assert_eq!(
            config.settings_bits(),
            settings::PAD | settings::LOW_Z | settings::INPUT_DI
        );
    }

    #[test]
    fn test_with_gain_targets_active_input() {
        let config = ChannelConfig::new(3)
            .with_gain(30)
            .with_input(InputSource::Line)
            .with_gain(99);
        assert_eq!(config.mic_gain, 30);
        assert_eq!(config.line_gain, 60);
        assert_eq!(config.di_gain, 0);
        assert_eq!(config.active_gain(), 60);
    }

    #[test]
    fn test_decoded_event_reported() {
        let config = ChannelConfig::new(1).with_gain(12);
        assert_eq!(DecodedEvent::ChannelUpdate(config).reported(), Some(&config));
        assert_eq!(DecodedEvent::ActiveGainUpdate(config).reported(), Some(&config));
        assert_eq!(DecodedEvent::Idle.reported(), None);
        assert_eq!(DecodedEvent::ActiveGainUpdate(config).kind(), "active_gain_update");
    }

    #[test]
    fn test_normalized() {
        let config = ChannelConfig {
            channel_id: 1,
            phantom: true,
            input: InputSource::Di,
            mic_gain: 200,
            line_gain: 61,
            di_gain: 255,
            ..ChannelConfig::default()
        };
        let normalized = config.normalized();
        assert!(!normalized.phantom);
        assert_eq!(normalized.mic_gain, 70);
        assert_eq!(normalized.line_gain, 60);
        assert_eq!(normalized.di_gain, 255);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("DI".parse::<InputSource>(), Ok(InputSource::Di));
        assert_eq!("back".parse::<Connection>(), Ok(Connection::Back));
        assert!("xlr".parse::<InputSource>().is_err());
        assert_eq!(Connection::from_operation_flag(1), Connection::Front);
        assert_eq!(Connection::from_operation_flag(2), Connection::Back);
    }

    #[test]
    fn test_config_json_shape() {
        let config = ChannelConfig::new(2).with_input(InputSource::Di);
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["input"], "di");
        assert_eq!(json["connection"], "front");
        assert_eq!(json["channel_id"], 2);
    }
}
