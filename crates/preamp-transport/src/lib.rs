//! # preamp-transport
//!
//! Transport abstraction layer for the preamp control client.
//!
//! The unit is reached over a single TCP connection. Everything above this
//! crate only sees the [`Transport`], [`Connection`], [`FrameReader`] and
//! [`FrameWriter`] traits, so sessions can be exercised over in-memory
//! streams.
//!
//! ```rust,ignore
//! use preamp_transport::{TcpTransport, Transport};
//!
//! let conn = TcpTransport::to("192.168.9.21", 51001).connect().await?;
//! let (mut reader, mut writer) = conn.split();
//! while let Some(frame) = reader.recv().await? {
//!     // Decode frame
//! }
//! ```

pub mod stream;
pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use stream::StreamConnection;
pub use traits::{Connection, ConnectionId, FrameReader, FrameWriter, Transport, TransportError};

#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpTransport};
