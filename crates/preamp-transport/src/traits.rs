//! Transport abstraction traits for the preamp client.
//!
//! A [`Transport`] knows how to reach the unit and yields a [`Connection`].
//! The connection splits into a [`FrameReader`] and a [`FrameWriter`] so a
//! session can wait for inbound frames while it writes.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a connection ID from the current time.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self(format!("unit_{:x}", timestamp))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connecting took too long.
    #[error("Connection timed out")]
    Timeout,

    /// The unit could not be reached.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A way of reaching the unit.
///
/// Transports do not reconnect; a dropped connection is the caller's to replace.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to the unit.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "tcp").
    fn name(&self) -> &'static str;
}

/// An open connection to the unit.
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split into independently usable read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

/// Read half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next complete frame.
    ///
    /// Returns `None` once the peer has closed and no bytes remain. This
    /// method is cancel safe: bytes read before cancellation stay buffered.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one pre-encoded frame.
    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the write side gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open for writing.
    fn is_open(&self) -> bool;
}
