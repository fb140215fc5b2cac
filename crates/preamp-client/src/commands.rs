//! Subcommand execution.
//!
//! One-shot commands open a session without a heartbeat, run one exchange
//! and close it again. `poll` and `monitor` keep the session open until
//! interrupted.

use crate::cli::Command;
use crate::config::Config;
use crate::session::{Exchange, Session, SessionError, SessionOptions};
use anyhow::{Context, Result};
use preamp_core::{ApplyResult, ChannelPatch, ChannelStateStore, StateChange};
use preamp_protocol::DecodedEvent;
use preamp_transport::{TcpTransport, Transport};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Run a parsed subcommand against the configured unit.
///
/// # Errors
///
/// Returns an error if the unit cannot be reached, an argument is rejected,
/// or a one-shot exchange fails.
pub async fn run(config: Config, command: Command) -> Result<()> {
    match command {
        Command::Set(args) => {
            let output = set(&config, args.channel, &args.patch(), args.dry_run).await?;
            print_json(&output)
        }
        Command::Gain(args) => {
            let patch = ChannelPatch::gain_only(args.value);
            let output = set(&config, args.channel, &patch, args.dry_run).await?;
            print_json(&output)
        }
        Command::Poll(args) => {
            let period = args
                .interval_ms
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or_else(|| config.heartbeat_interval());
            poll(&config, period, args.count).await
        }
        Command::Monitor => monitor(&config).await,
    }
}

/// Apply `patch` to a channel and send it, or only render the frame when
/// `dry_run` is set.
///
/// Fields the patch leaves out take the channel's defaults, since a new
/// process starts from a fresh store.
pub async fn set(
    config: &Config,
    channel_id: u8,
    patch: &ChannelPatch,
    dry_run: bool,
) -> Result<Value> {
    let options = SessionOptions {
        heartbeat_interval: None,
        ..config.session_options()
    };

    if dry_run {
        let sent = ChannelStateStore::new().set(channel_id, patch)?;
        let frame = options.codec.encode_command(&sent)?;
        return Ok(json!({
            "channel": channel_id,
            "sent": sent,
            "frame": hex(&frame),
            "encoding": options.codec.gain_encoding().as_str(),
        }));
    }

    let codec = options.codec;
    let session = connect(config, options).await?;
    let result = session.set_channel(channel_id, patch).await;
    session.shutdown().await;

    let (sent, exchange) = result?;
    let frame = codec.encode_command(&sent)?;
    Ok(json!({
        "channel": channel_id,
        "sent": sent,
        "frame": hex(&frame),
        "encoding": codec.gain_encoding().as_str(),
        "response": exchange_json(&exchange),
    }))
}

/// Poll the unit every `period` and print whatever it reports besides idle.
///
/// # Errors
///
/// Returns an error if the unit cannot be reached or the connection drops.
pub async fn poll(config: &Config, period: Duration, count: Option<u64>) -> Result<()> {
    let options = SessionOptions {
        heartbeat_interval: None,
        ..config.session_options()
    };
    let session = connect(config, options).await?;

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    let outcome = loop {
        if count.is_some_and(|n| sent >= n) {
            break Ok(());
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
            _ = ticker.tick() => {}
        }

        sent += 1;
        match session.poll().await {
            Ok(exchange) if exchange.event == DecodedEvent::Idle => {
                debug!(elapsed = ?exchange.elapsed, "Unit idle");
            }
            Ok(exchange) => {
                if let Err(e) = print_json(&exchange_json(&exchange)) {
                    break Err(e);
                }
            }
            Err(SessionError::Timeout(timeout)) => {
                warn!(?timeout, "Poll went unanswered");
            }
            Err(e) => break Err(e).context("Polling stopped"),
        }
    };

    session.shutdown().await;
    outcome
}

/// Hold a session open with heartbeats and print every state change.
///
/// # Errors
///
/// Returns an error if the unit cannot be reached.
pub async fn monitor(config: &Config) -> Result<()> {
    let mut options = config.session_options();
    if options.heartbeat_interval.is_none() {
        options.heartbeat_interval = Some(config.heartbeat_interval());
    }

    let session = connect(config, options).await?;
    let mut changes = session.store().read().await.subscribe();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
            _ = session.closed() => {
                break Err(anyhow::anyhow!("Unit closed the connection"));
            }
            change = changes.recv() => match change {
                Ok(change) => {
                    if let Err(e) = print_json(&change_json(&change)) {
                        break Err(e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Monitor fell behind; changes dropped");
                }
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    session.shutdown().await;
    outcome
}

async fn connect(config: &Config, options: SessionOptions) -> Result<Session> {
    let transport = TcpTransport::new(config.tcp_config());
    let conn = transport
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", transport.endpoint()))?;

    Ok(Session::start(conn, ChannelStateStore::shared(), options))
}

fn exchange_json(exchange: &Exchange) -> Value {
    let mut value = json!({
        "event": exchange.event.kind(),
        "applied": applied_label(&exchange.applied),
        "elapsed_ms": exchange.elapsed.as_secs_f64() * 1000.0,
    });
    if let Some(reported) = exchange.event.reported() {
        value["reported"] = json!(reported);
    }
    value
}

fn change_json(change: &StateChange) -> Value {
    json!({
        "channel": change.channel,
        "source": change.source,
        "timestamp": change.timestamp,
        "gain_changed": change.gain_changed(),
        "current": change.current,
    })
}

fn applied_label(applied: &ApplyResult) -> String {
    match applied {
        ApplyResult::Noop => "noop".to_string(),
        ApplyResult::Ignored => "ignored".to_string(),
        ApplyResult::Updated(channel) => format!("updated channel {}", channel),
        ApplyResult::UnknownChannel(channel) => format!("unknown channel {}", channel),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn print_json(value: &Value) -> Result<()> {
    let line = serde_json::to_string(value)?;
    println!("{}", line);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use preamp_protocol::{codec, GainEncoding, InputSource};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn local_config(port: u16) -> Config {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = port;
        config.protocol.response_timeout_ms = 1000;
        config
    }

    #[tokio::test]
    async fn test_dry_run_renders_frame_without_connecting() {
        // Nothing listens on port 1; a connection attempt would fail.
        let config = local_config(1);
        let patch = ChannelPatch::new()
            .with_phantom(true)
            .with_input(InputSource::Mic)
            .with_mic_gain(40);

        let output = set(&config, 2, &patch, true).await.unwrap();
        assert_eq!(
            output["frame"],
            "380b00001400000063020000000100000001280000123c"
        );
        assert_eq!(output["sent"]["mic_gain"], 40);
        assert!(output.get("response").is_none());
    }

    #[tokio::test]
    async fn test_dry_run_uses_configured_encoding() {
        let mut config = local_config(1);
        config.protocol.gain_encoding = GainEncoding::PerInputVariableWidth;

        let output = set(&config, 0, &ChannelPatch::gain_only(30), true)
            .await
            .unwrap();
        assert_eq!(output["encoding"], "per-input-variable-width");
        assert_eq!(output["frame"].as_str().unwrap().len(), 28 * 2);
    }

    #[tokio::test]
    async fn test_dry_run_rejects_out_of_range_channel() {
        let config = local_config(1);
        assert!(set(&config, 8, &ChannelPatch::gain_only(10), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_set_against_local_unit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let unit = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = vec![0u8; 23];
            socket.read_exact(&mut command).await.unwrap();
            socket.write_all(&codec::IDLE_ACK_FRAME).await.unwrap();
            command
        });

        let output = set(&local_config(port), 4, &ChannelPatch::gain_only(12), false)
            .await
            .unwrap();
        assert_eq!(output["response"]["event"], "idle");
        assert_eq!(output["response"]["applied"], "noop");

        let command = unit.await.unwrap();
        assert_eq!(hex(&command), output["frame"].as_str().unwrap());
        assert_eq!(command[9], 4);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x38, 0x0b, 0x00, 0xff]), "380b00ff");
    }

    #[test]
    fn test_applied_label() {
        assert_eq!(applied_label(&ApplyResult::Updated(3)), "updated channel 3");
        assert_eq!(applied_label(&ApplyResult::Noop), "noop");
    }
}
