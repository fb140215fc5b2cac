//! # preamp-protocol
//!
//! Wire protocol definitions for the studio preamp control client.
//!
//! The unit speaks fixed-layout binary frames over TCP. This crate turns a
//! [`ChannelConfig`] into a command frame and inbound frames back into a
//! [`DecodedEvent`]. It performs no I/O.
//!
//! ## Frame Types
//!
//! - Channel command / state (`0x63`) - per-channel front-end settings
//! - Heartbeat (`0x65`) - keep-alive and poll request
//! - Idle acknowledgement (`0x68`) - poll answer when nothing changed
//!
//! ## Example
//!
//! ```rust
//! use preamp_protocol::{codec, ChannelConfig, DecodedEvent};
//!
//! let config = ChannelConfig::new(2).with_gain(10);
//!
//! let encoded = codec::encode_command(&config).unwrap();
//! assert_eq!(codec::decode_frame(&encoded), DecodedEvent::ChannelUpdate(config));
//! ```

pub mod codec;
pub mod encoding;
pub mod frames;

pub use codec::{
    decode_frame, encode_command, encode_heartbeat, split_frame, split_frame_with, FrameCodec,
    ProtocolError,
};
pub use encoding::{GainEncoding, DEFAULT_GAIN_ENCODING};
pub use frames::{ChannelConfig, Connection, DecodedEvent, InputSource, CHANNEL_COUNT};
