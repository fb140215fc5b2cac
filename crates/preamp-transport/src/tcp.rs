//! TCP transport implementation.
//!
//! The unit listens on a plain TCP port. One connection carries commands,
//! heartbeats and the unit's notifications.

use async_trait::async_trait;
use preamp_protocol::{FrameCodec, GainEncoding};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::stream::StreamConnection;
use crate::traits::{Connection, Transport, TransportError};

/// Default address of the unit.
pub const DEFAULT_HOST: &str = "192.168.9.21";

/// Default control port of the unit.
pub const DEFAULT_PORT: u16 = 51001;

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Host name or address of the unit.
    pub host: String,
    /// Control port.
    pub port: u16,
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
    /// Disable Nagle so small command frames go out immediately.
    pub nodelay: bool,
    /// Gain layout used to split inbound channel frames.
    pub gain_encoding: GainEncoding,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            nodelay: true,
            gain_encoding: GainEncoding::default(),
        }
    }
}

/// TCP transport.
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport.
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Create a TCP transport for `host:port` with default settings.
    #[must_use]
    pub fn to(host: impl Into<String>, port: u16) -> Self {
        Self::new(TcpConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// The configured endpoint as `host:port`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let endpoint = self.endpoint();
        debug!("Connecting to {}", endpoint);

        let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let stream = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", endpoint, e);
                return Err(TransportError::Connect(format!("{}: {}", endpoint, e)));
            }
            Err(_) => {
                warn!("Timed out connecting to {}", endpoint);
                return Err(TransportError::Timeout);
            }
        };

        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }

        let remote = stream.peer_addr().map(|a| a.to_string()).ok();
        info!("Connected to {}", remote.as_deref().unwrap_or(&endpoint));

        let codec = FrameCodec::new(self.config.gain_encoding);
        Ok(Box::new(StreamConnection::new(stream, remote).with_codec(codec)))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
