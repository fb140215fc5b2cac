//! Channel state store.
//!
//! The store holds the last-known configuration of each of the unit's
//! eight channels. It is mutated by local `set` requests and by frames
//! decoded from the unit, and broadcasts every effective change.

use crate::change::{ChangeSource, StateChange};
use crate::patch::ChannelPatch;
use preamp_protocol::{ChannelConfig, DecodedEvent, InputSource, CHANNEL_COUNT};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace, warn};

const SLOTS: usize = CHANNEL_COUNT as usize;

/// Default change broadcast capacity.
const DEFAULT_CHANGE_CAPACITY: usize = 64;

/// A store shared between the session loop and its callers.
///
/// Writers take the write lock for the duration of one `apply` or `set`.
pub type SharedStore = Arc<RwLock<ChannelStateStore>>;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The channel id does not address one of the unit's channels.
    #[error("Channel {0} is out of range (0-7)")]
    OutOfRange(u8),
}

/// Outcome of applying a decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// An idle acknowledgement; nothing to do.
    Noop,
    /// An unrecognized frame; dropped.
    Ignored,
    /// The channel's record was overwritten.
    Updated(u8),
    /// The update named a channel the unit does not have. Nothing changed.
    UnknownChannel(u8),
}

/// Last-known configuration of every channel.
#[derive(Debug)]
pub struct ChannelStateStore {
    channels: [ChannelConfig; SLOTS],
    sender: broadcast::Sender<StateChange>,
}

impl ChannelStateStore {
    /// Create a store with every channel at its defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Create a store with a specific change broadcast capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            channels: std::array::from_fn(|i| ChannelConfig::new(i as u8)),
            sender,
        }
    }

    /// Create a default store behind a lock.
    #[must_use]
    pub fn shared() -> SharedStore {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Configuration of one channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel id is out of range.
    pub fn get(&self, channel_id: u8) -> Result<ChannelConfig, StoreError> {
        self.channels
            .get(usize::from(channel_id))
            .copied()
            .ok_or(StoreError::OutOfRange(channel_id))
    }

    /// Merge `patch` into a channel and return the full resulting config.
    ///
    /// Fields the patch leaves out keep their current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel id is out of range.
    pub fn set(&mut self, channel_id: u8, patch: &ChannelPatch) -> Result<ChannelConfig, StoreError> {
        let slot = self
            .channels
            .get_mut(usize::from(channel_id))
            .ok_or(StoreError::OutOfRange(channel_id))?;

        let previous = *slot;
        let current = patch.apply_to(previous);
        *slot = current;

        debug!(channel = channel_id, input = %current.input, gain = current.active_gain(), "Channel set locally");
        self.notify(previous, current, ChangeSource::Local);

        Ok(current)
    }

    /// Apply a decoded frame.
    ///
    /// A full update overwrites the channel. An active-gain update keeps the
    /// retained gains of the inactive inputs.
    pub fn apply(&mut self, event: &DecodedEvent) -> ApplyResult {
        let (update, active_only) = match event {
            DecodedEvent::Idle => return ApplyResult::Noop,
            DecodedEvent::Unrecognized => return ApplyResult::Ignored,
            DecodedEvent::ChannelUpdate(update) => (update, false),
            DecodedEvent::ActiveGainUpdate(update) => (update, true),
        };

        let channel_id = update.channel_id;
        let Some(slot) = self.channels.get_mut(usize::from(channel_id)) else {
            warn!(channel = channel_id, "Update for unknown channel");
            return ApplyResult::UnknownChannel(channel_id);
        };

        let previous = *slot;
        let mut current = *update;
        if active_only {
            for input in InputSource::ALL {
                if input != current.input {
                    current.set_gain(input, i32::from(previous.gain(input)));
                }
            }
        }
        *slot = current;

        debug!(channel = channel_id, input = %current.input, gain = current.active_gain(), active_only, "Channel updated by unit");
        self.notify(previous, current, ChangeSource::Device);

        ApplyResult::Updated(channel_id)
    }

    /// Copy of every channel's configuration.
    #[must_use]
    pub fn snapshot(&self) -> [ChannelConfig; SLOTS] {
        self.channels
    }

    /// Iterate over the channels in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter()
    }

    /// Receive every effective change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }

    fn notify(&self, previous: ChannelConfig, current: ChannelConfig, source: ChangeSource) {
        if previous == current {
            return;
        }
        let change = StateChange::new(previous, current, source);
        let receivers = self.sender.send(change).unwrap_or_default();
        trace!(channel = current.channel_id, receivers, "Broadcast state change");
    }
}

impl Default for ChannelStateStore {
    fn default() -> Self {
        Self::new()
    }
}
