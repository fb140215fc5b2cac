//! Codec for encoding and decoding preamp frames.
//!
//! Frames have no delimiter. Every message type has a fixed size, and the
//! command id at offset 8 tells the stream splitter which size applies.
//! Channel-state frames come in two sizes under the fixed triple layout: a
//! 23-byte command shape that closes with the gain suffix, and the unit's
//! 28-byte report with the gains at the end.
//!
//! Command frame layout:
//!
//! ```text
//! ┌────────────────────────────┬────┬──────────┬──────────┬──────────┬────────┬─────────┐
//! │ header (9B)                │ ch │ flag     │ settings │ gain     │ suffix │ padding │
//! │ 38 0b 00 00 14 00 00 00 63 │ 1B │ 4B BE    │ 4B BE    │ 2–4B     │ 12 3c  │ zeros   │
//! └────────────────────────────┴────┴──────────┴──────────┴──────────┴────────┴─────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::encoding::GainEncoding;
use crate::frames::{
    settings, ChannelConfig, Connection, DecodedEvent, InputSource, MAX_DI_GAIN, MAX_LINE_GAIN,
    MAX_MIC_GAIN,
};

/// Magic bytes that open every frame.
pub const MAGIC: [u8; 4] = [0x38, 0x0b, 0x00, 0x00];

/// Header and command id of a channel-state command.
pub const COMMAND_HEADER: [u8; 9] = [0x38, 0x0b, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x63];

/// Bytes needed before the frame type is known.
pub const HEADER_LEN: usize = 9;

/// Command id of channel-state frames, in both directions.
pub const CMD_CHANNEL_STATE: u8 = 0x63;

/// Command id of the heartbeat/poll frame.
pub const CMD_HEARTBEAT: u8 = 0x65;

/// Command id of the unit's idle acknowledgement.
pub const CMD_IDLE_ACK: u8 = 0x68;

/// Keep-alive frame. Also serves as the poll request.
pub const HEARTBEAT_FRAME: [u8; 28] = [
    0x38, 0x0b, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x65, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// The unit's answer to a poll when nothing changed.
pub const IDLE_ACK_FRAME: [u8; 11] = [
    0x38, 0x0b, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x68, 0x00, 0x04,
];

/// Native length of channel-state and heartbeat frames on the unit.
pub const DEVICE_FRAME_LEN: usize = 28;

/// Fixed suffix that closes the gain region.
pub const GAIN_SUFFIX: [u8; 2] = [0x12, 0x3c];

/// Sub-header preceding a DI gain in the per-input encoding.
pub const DI_GAIN_PREFIX: [u8; 2] = [0x00, 0x14];

/// Offset added to a DI gain in the per-input encoding.
pub const DI_GAIN_BASE: u16 = 0x123c;

const CHANNEL_OFFSET: usize = 9;
const FLAG_OFFSET: usize = 10;
const SETTINGS_OFFSET: usize = 14;
const GAIN_OFFSET: usize = 18;

/// Protocol errors that can occur while encoding.
///
/// Decoding never fails: unknown input becomes [`DecodedEvent::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The channel id does not address one of the unit's channels.
    #[error("Channel {0} is out of range (0-7)")]
    ChannelOutOfRange(u8),
}

/// Encode a channel command with the default (fixed triple byte) gain encoding.
///
/// # Errors
///
/// Returns an error if the channel id is out of range.
pub fn encode_command(config: &ChannelConfig) -> Result<Bytes, ProtocolError> {
    encode_command_with(config, GainEncoding::default())
}

/// Encode a channel command with an explicit gain encoding.
///
/// Gains are clamped and phantom power is dropped for non-mic inputs.
///
/// # Errors
///
/// Returns an error if the channel id is out of range.
pub fn encode_command_with(
    config: &ChannelConfig,
    encoding: GainEncoding,
) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(encoding.frame_len());
    encode_into(config, encoding, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a channel command into an existing buffer.
///
/// # Errors
///
/// Returns an error if the channel id is out of range. Nothing is written in that case.
pub fn encode_into(
    config: &ChannelConfig,
    encoding: GainEncoding,
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    if !config.is_valid_channel() {
        return Err(ProtocolError::ChannelOutOfRange(config.channel_id));
    }

    let start = buf.len();
    buf.reserve(encoding.frame_len());
    buf.put_slice(&COMMAND_HEADER);
    buf.put_u8(config.channel_id);
    buf.put_u32(config.connection.operation_flag());
    buf.put_u32(config.settings_bits());

    match encoding {
        GainEncoding::FixedTripleByte => {
            buf.put_u8(config.mic_gain.min(MAX_MIC_GAIN));
            buf.put_u8(config.line_gain.min(MAX_LINE_GAIN));
            buf.put_u8(config.di_gain.min(MAX_DI_GAIN));
        }
        GainEncoding::PerInputVariableWidth => match config.input {
            InputSource::Di => {
                buf.put_slice(&DI_GAIN_PREFIX);
                buf.put_u16(DI_GAIN_BASE + u16::from(config.di_gain));
            }
            InputSource::Mic => buf.put_u16(u16::from(config.mic_gain.min(MAX_MIC_GAIN))),
            InputSource::Line => buf.put_u16(u16::from(config.line_gain.min(MAX_LINE_GAIN))),
        },
    }

    buf.put_slice(&GAIN_SUFFIX);
    buf.resize(start + encoding.frame_len(), 0);
    Ok(())
}

/// The keep-alive frame.
#[must_use]
pub fn encode_heartbeat() -> Bytes {
    Bytes::from_static(&HEARTBEAT_FRAME)
}

/// Decode a frame using the default (fixed triple byte) gain layout.
#[must_use]
pub fn decode_frame(data: &[u8]) -> DecodedEvent {
    decode_frame_with(data, GainEncoding::default())
}

/// Decode a frame using an explicit gain layout.
///
/// Under [`GainEncoding::PerInputVariableWidth`] only the active input's
/// gain can be recovered, so channel frames decode to
/// [`DecodedEvent::ActiveGainUpdate`] with the other two gains zeroed.
#[must_use]
pub fn decode_frame_with(data: &[u8], encoding: GainEncoding) -> DecodedEvent {
    if is_idle_ack(data) {
        return DecodedEvent::Idle;
    }

    if !is_channel_frame(data, encoding) {
        return DecodedEvent::Unrecognized;
    }

    let flag = read_u32(data, FLAG_OFFSET);
    let bits = read_u32(data, SETTINGS_OFFSET);
    let mut config = ChannelConfig {
        channel_id: data[CHANNEL_OFFSET],
        phantom: bits & settings::PHANTOM != 0,
        pad: bits & settings::PAD != 0,
        low_z: bits & settings::LOW_Z != 0,
        input: InputSource::from_settings(bits),
        connection: Connection::from_operation_flag(flag),
        ..ChannelConfig::default()
    };

    match encoding {
        GainEncoding::FixedTripleByte => {
            let at = triple_gain_offset(data);
            config.mic_gain = data[at];
            config.line_gain = data[at + 1];
            config.di_gain = data[at + 2];
        }
        GainEncoding::PerInputVariableWidth => {
            let raw = match config.input {
                InputSource::Di => {
                    if data[GAIN_OFFSET..GAIN_OFFSET + 2] != DI_GAIN_PREFIX {
                        return DecodedEvent::Unrecognized;
                    }
                    read_u16(data, GAIN_OFFSET + 2).saturating_sub(DI_GAIN_BASE)
                }
                InputSource::Mic | InputSource::Line => read_u16(data, GAIN_OFFSET),
            };
            config.set_gain(config.input, i32::from(raw));
            return DecodedEvent::ActiveGainUpdate(config);
        }
    }

    DecodedEvent::ChannelUpdate(config)
}

/// Whether `data` is the idle acknowledgement, optionally zero padded.
#[must_use]
pub fn is_idle_ack(data: &[u8]) -> bool {
    data.len() >= IDLE_ACK_FRAME.len()
        && data.len() <= DEVICE_FRAME_LEN
        && data[..IDLE_ACK_FRAME.len()] == IDLE_ACK_FRAME
        && data[IDLE_ACK_FRAME.len()..].iter().all(|b| *b == 0)
}

/// Fixed size of a frame with the given command id, if the type is known.
#[must_use]
pub fn frame_len_for(command_id: u8) -> Option<usize> {
    match command_id {
        CMD_IDLE_ACK => Some(IDLE_ACK_FRAME.len()),
        CMD_HEARTBEAT | CMD_CHANNEL_STATE => Some(DEVICE_FRAME_LEN),
        _ => None,
    }
}

/// Split one frame off the front of a receive buffer, assuming the default
/// (fixed triple byte) gain layout.
///
/// Returns `None` if more data is needed. Bytes that cannot start a known
/// frame are flushed as a single frame up to the next magic, and decode to
/// [`DecodedEvent::Unrecognized`].
pub fn split_frame(buf: &mut BytesMut) -> Option<Bytes> {
    split_frame_with(buf, GainEncoding::default())
}

/// Split one frame off the front of a receive buffer for a gain layout.
///
/// Cuts channel-state frames at the same lengths
/// [`decode_frame_with`] accepts for `encoding`.
pub fn split_frame_with(buf: &mut BytesMut, encoding: GainEncoding) -> Option<Bytes> {
    if buf.is_empty() {
        return None;
    }

    let prefix = buf.len().min(MAGIC.len());
    if buf[..prefix] != MAGIC[..prefix] {
        let junk = resync_point(buf);
        return Some(buf.split_to(junk).freeze());
    }

    if buf.len() < HEADER_LEN {
        return None;
    }

    let length = match buf[HEADER_LEN - 1] {
        CMD_CHANNEL_STATE => channel_frame_len(buf, encoding)?,
        command_id => match frame_len_for(command_id) {
            Some(length) => length,
            None => {
                let junk = resync_point(buf);
                return Some(buf.split_to(junk).freeze());
            }
        },
    };

    if buf.len() < length {
        return None;
    }

    Some(buf.split_to(length).freeze())
}

/// Length of the channel-state frame at the front of `buf`, once enough
/// bytes are buffered to tell.
fn channel_frame_len(buf: &[u8], encoding: GainEncoding) -> Option<usize> {
    match encoding {
        GainEncoding::PerInputVariableWidth => Some(DEVICE_FRAME_LEN),
        GainEncoding::FixedTripleByte => {
            let short = GainEncoding::FixedTripleByte.frame_len();
            if buf.len() < short {
                None
            } else if has_command_suffix(&buf[..short]) {
                Some(short)
            } else {
                Some(DEVICE_FRAME_LEN)
            }
        }
    }
}

/// Index of the first byte after the front that could open a frame: a full
/// magic, or a magic prefix running to the end of the buffer.
fn resync_point(buf: &[u8]) -> usize {
    (1..buf.len())
        .find(|&at| {
            let rest = &buf[at..];
            let n = rest.len().min(MAGIC.len());
            rest[..n] == MAGIC[..n]
        })
        .unwrap_or(buf.len())
}

fn is_channel_frame(data: &[u8], encoding: GainEncoding) -> bool {
    let length_ok = match encoding {
        GainEncoding::FixedTripleByte => {
            has_command_suffix(data) || data.len() == DEVICE_FRAME_LEN
        }
        GainEncoding::PerInputVariableWidth => data.len() == DEVICE_FRAME_LEN,
    };

    length_ok && data[..MAGIC.len()] == MAGIC && data[HEADER_LEN - 1] == CMD_CHANNEL_STATE
}

/// Whether `data` is a 23-byte command-shaped frame closed by the suffix.
fn has_command_suffix(data: &[u8]) -> bool {
    data.len() == GainEncoding::FixedTripleByte.frame_len() && data.ends_with(&GAIN_SUFFIX)
}

/// Offset of the mic/line/di triple.
///
/// The unit reports the gains as the last three bytes of its 28-byte frame.
/// In the 23-byte command shape they sit just before the suffix.
fn triple_gain_offset(data: &[u8]) -> usize {
    if has_command_suffix(data) {
        GAIN_OFFSET
    } else {
        data.len() - 3
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

/// Codec bound to one gain encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec {
    gain_encoding: GainEncoding,
}

impl FrameCodec {
    /// Create a codec for the given gain encoding.
    #[must_use]
    pub fn new(gain_encoding: GainEncoding) -> Self {
        Self { gain_encoding }
    }

    /// The gain encoding this codec speaks.
    #[must_use]
    pub fn gain_encoding(&self) -> GainEncoding {
        self.gain_encoding
    }

    /// Encode a channel command.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel id is out of range.
    pub fn encode_command(&self, config: &ChannelConfig) -> Result<Bytes, ProtocolError> {
        encode_command_with(config, self.gain_encoding)
    }

    /// The keep-alive frame.
    #[must_use]
    pub fn encode_heartbeat(&self) -> Bytes {
        encode_heartbeat()
    }

    /// Decode an inbound frame.
    #[must_use]
    pub fn decode(&self, data: &[u8]) -> DecodedEvent {
        decode_frame_with(data, self.gain_encoding)
    }

    /// Split one frame off a receive buffer.
    pub fn split_frame(&self, buf: &mut BytesMut) -> Option<Bytes> {
        split_frame_with(buf, self.gain_encoding)
    }
}
