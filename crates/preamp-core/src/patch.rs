//! Partial channel updates.
//!
//! A [`ChannelPatch`] names only the fields a caller wants to change.
//! Everything else keeps its last-known value, so switching input and back
//! restores the gain that input had before.

use preamp_protocol::{ChannelConfig, Connection, InputSource};

/// Fields to merge into a channel's current configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelPatch {
    pub phantom: Option<bool>,
    pub pad: Option<bool>,
    pub low_z: Option<bool>,
    pub input: Option<InputSource>,
    pub connection: Option<Connection>,
    pub mic_gain: Option<i32>,
    pub line_gain: Option<i32>,
    pub di_gain: Option<i32>,
    /// Gain for whichever input is selected once the patch is applied.
    pub gain: Option<i32>,
}

impl ChannelPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A patch that only changes the active input's gain.
    #[must_use]
    pub fn gain_only(gain: i32) -> Self {
        Self::new().with_gain(gain)
    }

    #[must_use]
    pub fn with_phantom(mut self, on: bool) -> Self {
        self.phantom = Some(on);
        self
    }

    #[must_use]
    pub fn with_pad(mut self, on: bool) -> Self {
        self.pad = Some(on);
        self
    }

    #[must_use]
    pub fn with_low_z(mut self, on: bool) -> Self {
        self.low_z = Some(on);
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: InputSource) -> Self {
        self.input = Some(input);
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    #[must_use]
    pub fn with_mic_gain(mut self, gain: i32) -> Self {
        self.mic_gain = Some(gain);
        self
    }

    #[must_use]
    pub fn with_line_gain(mut self, gain: i32) -> Self {
        self.line_gain = Some(gain);
        self
    }

    #[must_use]
    pub fn with_di_gain(mut self, gain: i32) -> Self {
        self.di_gain = Some(gain);
        self
    }

    #[must_use]
    pub fn with_gain(mut self, gain: i32) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge this patch into `config`.
    ///
    /// The input is resolved first so that `gain` lands on the input the
    /// channel ends up on. Gains are clamped to their input's range.
    #[must_use]
    pub fn apply_to(&self, mut config: ChannelConfig) -> ChannelConfig {
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(connection) = self.connection {
            config.connection = connection;
        }
        if let Some(phantom) = self.phantom {
            config.phantom = phantom;
        }
        if let Some(pad) = self.pad {
            config.pad = pad;
        }
        if let Some(low_z) = self.low_z {
            config.low_z = low_z;
        }
        if let Some(gain) = self.mic_gain {
            config.set_gain(InputSource::Mic, gain);
        }
        if let Some(gain) = self.line_gain {
            config.set_gain(InputSource::Line, gain);
        }
        if let Some(gain) = self.di_gain {
            config.set_gain(InputSource::Di, gain);
        }
        if let Some(gain) = self.gain {
            config.set_gain(config.input, gain);
        }
        config
    }
}
