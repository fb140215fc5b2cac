//! Session with one unit.
//!
//! The protocol carries no request ids, so a response can only be
//! attributed to the one exchange in flight. A single driver task owns the
//! connection: user commands, polls and heartbeats all queue through it,
//! and nothing new is written until the current exchange has a response or
//! has timed out.

use crate::metrics::{self, SessionMetricsGuard};
use bytes::Bytes;
use preamp_core::{ApplyResult, ChannelPatch, SharedStore, StoreError};
use preamp_protocol::{ChannelConfig, DecodedEvent, FrameCodec, ProtocolError};
use preamp_transport::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The unit did not answer in time. The exchange is abandoned, not retried.
    #[error("No response from unit within {0:?}")]
    Timeout(Duration),

    /// The connection closed before the exchange completed.
    #[error("Transport closed")]
    TransportClosed,

    /// Writing to the unit failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The command could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The channel id was rejected by the store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Codec used for every frame on this connection.
    pub codec: FrameCodec,
    /// Keep-alive period. `None` disables the built-in heartbeat, e.g.
    /// when the caller polls at its own cadence.
    pub heartbeat_interval: Option<Duration>,
    /// How long an exchange may wait for the unit's answer.
    pub response_timeout: Duration,
    /// Depth of the outbound request queue.
    pub queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            codec: FrameCodec::default(),
            heartbeat_interval: Some(Duration::from_millis(4000)),
            response_timeout: Duration::from_millis(3000),
            queue_capacity: 32,
        }
    }
}

/// The unit's answer to one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// What the response frame decoded to.
    pub event: DecodedEvent,
    /// What applying it to the store did.
    pub applied: ApplyResult,
    /// Time from write to response.
    pub elapsed: Duration,
}

type Reply = oneshot::Sender<Result<Exchange, SessionError>>;

struct Request {
    kind: &'static str,
    frame: Bytes,
    reply: Option<Reply>,
}

struct InFlight {
    kind: &'static str,
    started: Instant,
    deadline: time::Instant,
    reply: Option<Reply>,
}

/// Handle to a running session.
pub struct Session {
    id: ConnectionId,
    requests: mpsc::Sender<Request>,
    store: SharedStore,
    codec: FrameCodec,
    closed: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl Session {
    /// Take ownership of `conn` and start the driver task.
    #[must_use]
    pub fn start(conn: Box<dyn Connection>, store: SharedStore, options: SessionOptions) -> Self {
        let id = conn.id().clone();
        let (reader, writer) = conn.split();
        let (requests, queue) = mpsc::channel(options.queue_capacity);
        let (closed_tx, closed) = watch::channel(false);

        info!(connection = %id, encoding = %options.codec.gain_encoding(), "Session started");

        let driver = Driver {
            id: id.clone(),
            reader,
            writer,
            queue,
            store: store.clone(),
            options: options.clone(),
            in_flight: None,
            closed: closed_tx,
        };

        Self {
            id,
            requests,
            store,
            codec: options.codec,
            closed,
            task: tokio::spawn(driver.run()),
        }
    }

    /// Connection this session runs on.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The store this session keeps in sync.
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Merge `patch` into a channel, send the resulting full config and wait
    /// for the unit's answer.
    ///
    /// The store is updated before the command is sent. Returns the config
    /// that was sent and the exchange.
    ///
    /// # Errors
    ///
    /// Fails if the channel is out of range, the unit does not answer in
    /// time, or the connection is gone.
    pub async fn set_channel(
        &self,
        channel_id: u8,
        patch: &ChannelPatch,
    ) -> Result<(ChannelConfig, Exchange), SessionError> {
        let config = self.store.write().await.set(channel_id, patch)?;
        let frame = self.codec.encode_command(&config)?;
        debug!(connection = %self.id, channel = channel_id, "Sending channel command");
        let exchange = self.exchange("command", frame).await?;
        Ok((config, exchange))
    }

    /// Send a poll and wait for the unit's answer.
    ///
    /// # Errors
    ///
    /// Fails if the unit does not answer in time or the connection is gone.
    pub async fn poll(&self) -> Result<Exchange, SessionError> {
        self.exchange("poll", self.codec.encode_heartbeat()).await
    }

    /// Whether the driver has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the connection closes.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop accepting requests, let the driver close the connection, and wait for it.
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(e) = self.task.await {
            warn!(connection = %self.id, error = %e, "Session task failed");
        }
    }

    async fn exchange(&self, kind: &'static str, frame: Bytes) -> Result<Exchange, SessionError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request {
                kind,
                frame,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SessionError::TransportClosed)?;

        response.await.map_err(|_| SessionError::TransportClosed)?
    }
}

/// Owns the connection and serializes every exchange on it.
struct Driver {
    id: ConnectionId,
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
    queue: mpsc::Receiver<Request>,
    store: SharedStore,
    options: SessionOptions,
    in_flight: Option<InFlight>,
    closed: watch::Sender<bool>,
}

impl Driver {
    async fn run(mut self) {
        let _metrics_guard = SessionMetricsGuard::new();

        // interval() panics on a zero period; a disabled heartbeat never ticks anyway
        let period = self
            .options
            .heartbeat_interval
            .filter(|p| !p.is_zero())
            .unwrap_or(Duration::from_secs(3600));
        let heartbeat_enabled = self.options.heartbeat_interval.is_some();
        let mut heartbeat = time::interval_at(time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.in_flight.as_ref().map(|f| f.deadline);

            tokio::select! {
                biased;

                inbound = self.reader.recv() => {
                    match inbound {
                        Ok(Some(frame)) => self.handle_frame(&frame).await,
                        Ok(None) => {
                            info!(connection = %self.id, "Unit closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!(connection = %self.id, error = %e, "Receive failed");
                            metrics::record_error("receive");
                            break;
                        }
                    }
                }

                _ = time::sleep_until(deadline.unwrap_or_else(time::Instant::now)), if deadline.is_some() => {
                    self.expire();
                }

                request = self.queue.recv(), if self.in_flight.is_none() => {
                    match request {
                        Some(request) => {
                            if !self.dispatch(request).await {
                                break;
                            }
                        }
                        None => {
                            debug!(connection = %self.id, "All session handles dropped");
                            break;
                        }
                    }
                }

                _ = heartbeat.tick(), if heartbeat_enabled && self.in_flight.is_none() => {
                    let request = Request {
                        kind: "heartbeat",
                        frame: self.options.codec.encode_heartbeat(),
                        reply: None,
                    };
                    if !self.dispatch(request).await {
                        break;
                    }
                }
            }
        }

        self.finish().await;
    }

    /// Write a request and mark it in flight. Returns false if the connection is unusable.
    async fn dispatch(&mut self, request: Request) -> bool {
        let len = request.frame.len();

        if let Err(e) = self.writer.send_raw(request.frame).await {
            warn!(connection = %self.id, kind = request.kind, error = %e, "Send failed");
            metrics::record_error("send");
            if let Some(reply) = request.reply {
                let _ = reply.send(Err(SessionError::Transport(e)));
            }
            return false;
        }

        trace!(connection = %self.id, kind = request.kind, len, "Frame sent");
        metrics::record_frame_sent(request.kind, len);

        self.in_flight = Some(InFlight {
            kind: request.kind,
            started: Instant::now(),
            deadline: time::Instant::now() + self.options.response_timeout,
            reply: request.reply,
        });
        true
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        let event = self.options.codec.decode(frame);
        metrics::record_frame_received(event.kind(), frame.len());

        let applied = self.store.write().await.apply(&event);
        match applied {
            ApplyResult::Noop => trace!(connection = %self.id, "Idle acknowledgement"),
            ApplyResult::Ignored => {
                warn!(connection = %self.id, len = frame.len(), "Unrecognized frame ignored");
            }
            ApplyResult::Updated(channel) => {
                debug!(connection = %self.id, channel, "Channel state received");
            }
            ApplyResult::UnknownChannel(channel) => {
                warn!(connection = %self.id, channel, "State for unknown channel ignored");
            }
        }

        let Some(in_flight) = self.in_flight.take() else {
            debug!(connection = %self.id, kind = event.kind(), "Unsolicited frame");
            return;
        };

        let elapsed = in_flight.started.elapsed();
        metrics::record_exchange_latency(elapsed.as_secs_f64());
        trace!(connection = %self.id, kind = in_flight.kind, ?elapsed, "Exchange complete");

        if let Some(reply) = in_flight.reply {
            let _ = reply.send(Ok(Exchange {
                event,
                applied,
                elapsed,
            }));
        }
    }

    fn expire(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };

        let timeout = self.options.response_timeout;
        warn!(connection = %self.id, kind = in_flight.kind, ?timeout, "No response from unit");
        metrics::record_timeout(in_flight.kind);

        if let Some(reply) = in_flight.reply {
            let _ = reply.send(Err(SessionError::Timeout(timeout)));
        }
    }

    async fn finish(mut self) {
        if let Some(reply) = self.in_flight.take().and_then(|f| f.reply) {
            let _ = reply.send(Err(SessionError::TransportClosed));
        }

        self.queue.close();
        while let Ok(request) = self.queue.try_recv() {
            if let Some(reply) = request.reply {
                let _ = reply.send(Err(SessionError::TransportClosed));
            }
        }

        if let Err(e) = self.writer.close().await {
            debug!(connection = %self.id, error = %e, "Close failed");
        }

        self.closed.send_replace(true);
        info!(connection = %self.id, "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preamp_core::{ChangeSource, ChannelStateStore};
    use preamp_protocol::codec::{self, HEARTBEAT_FRAME, IDLE_ACK_FRAME};
    use preamp_protocol::{Connection as Connector, InputSource};
    use preamp_transport::StreamConnection;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn options() -> SessionOptions {
        SessionOptions {
            heartbeat_interval: None,
            response_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn start(options: SessionOptions) -> (Session, DuplexStream) {
        let (client, unit) = tokio::io::duplex(1024);
        let conn = Box::new(StreamConnection::new(client, None));
        (
            Session::start(conn, ChannelStateStore::shared(), options),
            unit,
        )
    }

    /// A 28-byte state report in the unit's layout, gains last.
    fn unit_report(config: &ChannelConfig) -> Vec<u8> {
        let mut frame = codec::encode_command(config).unwrap().to_vec();
        frame.truncate(18);
        frame.resize(25, 0);
        frame.extend_from_slice(&[config.mic_gain, config.line_gain, config.di_gain]);
        frame
    }

    async fn read_frame(unit: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        unit.read_exact(&mut frame).await.unwrap();
        frame
    }

    #[tokio::test]
    async fn test_set_channel_sends_command_and_applies_response() {
        let (session, mut unit) = start(options());

        let unit_task = tokio::spawn(async move {
            let frame = read_frame(&mut unit, 23).await;
            let reported = ChannelConfig::new(2)
                .with_connection(Connector::Back)
                .with_gain(10);
            unit.write_all(&unit_report(&reported)).await.unwrap();
            (frame, unit)
        });

        let patch = ChannelPatch::new()
            .with_input(InputSource::Mic)
            .with_connection(Connector::Front)
            .with_mic_gain(10);
        let (sent, exchange) = session.set_channel(2, &patch).await.unwrap();

        let (frame, _unit) = unit_task.await.unwrap();
        assert_eq!(frame, codec::encode_command(&sent).unwrap().to_vec());
        assert_eq!(exchange.applied, ApplyResult::Updated(2));

        // The unit's report wins over the locally set value
        let stored = session.store().read().await.get(2).unwrap();
        assert_eq!(stored.connection, Connector::Back);
        assert_eq!(stored.mic_gain, 10);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_out_of_range_channel_is_rejected_before_sending() {
        let (session, _unit) = start(options());
        let result = session.set_channel(8, &ChannelPatch::gain_only(3)).await;
        assert!(matches!(
            result,
            Err(SessionError::Store(StoreError::OutOfRange(8)))
        ));
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_times_out_and_session_continues() {
        let (session, mut unit) = start(options());

        let result = session.poll().await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
        assert_eq!(read_frame(&mut unit, 28).await, HEARTBEAT_FRAME.to_vec());

        let unit_task = tokio::spawn(async move {
            read_frame(&mut unit, 28).await;
            unit.write_all(&IDLE_ACK_FRAME).await.unwrap();
            unit
        });

        let exchange = session.poll().await.unwrap();
        assert_eq!(exchange.event, DecodedEvent::Idle);
        assert_eq!(exchange.applied, ApplyResult::Noop);

        let _unit = unit_task.await.unwrap();
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_exchange_in_flight() {
        let options = SessionOptions {
            response_timeout: Duration::from_secs(2),
            ..options()
        };
        let (session, mut unit) = start(options);

        let unit_task = tokio::spawn(async move {
            let first = read_frame(&mut unit, 23).await;

            // Nothing else may be written until this exchange is answered
            let mut next = [0u8; 1];
            let early = time::timeout(Duration::from_millis(500), unit.read(&mut next)).await;
            assert!(early.is_err());

            unit.write_all(&IDLE_ACK_FRAME).await.unwrap();
            let second = read_frame(&mut unit, 23).await;
            unit.write_all(&IDLE_ACK_FRAME).await.unwrap();
            (first[9], second[9])
        });

        let first_patch = ChannelPatch::gain_only(1);
        let second_patch = ChannelPatch::gain_only(2);
        let (a, b) = tokio::join!(
            session.set_channel(0, &first_patch),
            session.set_channel(1, &second_patch),
        );
        assert!(a.is_ok() && b.is_ok());

        let (first, second) = unit_task.await.unwrap();
        assert_eq!((first, second), (0, 1));

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_sent_periodically() {
        let options = SessionOptions {
            heartbeat_interval: Some(Duration::from_millis(4000)),
            ..options()
        };
        let (session, mut unit) = start(options);

        for _ in 0..2 {
            assert_eq!(read_frame(&mut unit, 28).await, HEARTBEAT_FRAME.to_vec());
            unit.write_all(&IDLE_ACK_FRAME).await.unwrap();
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsolicited_update_reaches_subscribers() {
        let (session, mut unit) = start(options());
        let mut changes = session.store().read().await.subscribe();

        let reported = ChannelConfig::new(5)
            .with_input(InputSource::Line)
            .with_gain(25);
        unit.write_all(&unit_report(&reported)).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.channel, 5);
        assert_eq!(change.source, ChangeSource::Device);
        assert_eq!(change.current, reported);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_later_requests() {
        let (session, mut unit) = start(options());

        let unit_task = tokio::spawn(async move {
            read_frame(&mut unit, 28).await;
            drop(unit);
        });

        let result = session.poll().await;
        assert!(matches!(result, Err(SessionError::TransportClosed)));
        unit_task.await.unwrap();

        session.closed().await;
        assert!(session.is_closed());
        assert!(matches!(
            session.poll().await,
            Err(SessionError::TransportClosed)
        ));
    }
}
