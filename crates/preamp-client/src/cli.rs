//! Command line interface.

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use preamp_core::ChannelPatch;
use preamp_protocol::{Connection, GainEncoding, InputSource};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "preampctl", version, about = "Control a networked studio preamp")]
pub struct Cli {
    /// Configuration file (defaults to preamp.toml in the usual places).
    #[arg(long, short, value_name = "FILE", env = "PREAMP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Address of the unit.
    #[arg(long, value_name = "HOST", global = true)]
    pub host: Option<String>,

    /// Control port of the unit.
    #[arg(long, value_name = "PORT", global = true)]
    pub port: Option<u16>,

    /// Gain layout of command frames.
    #[arg(long, value_name = "ENCODING", global = true)]
    pub gain_encoding: Option<GainEncoding>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Change any combination of a channel's settings.
    Set(SetArgs),
    /// Set the gain of a channel's active input.
    Gain(GainArgs),
    /// Poll the unit and print what it reports.
    Poll(PollArgs),
    /// Keep a session open and print every state change.
    Monitor,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Channel, 0 to 7.
    pub channel: u8,

    /// Phantom power (on/off).
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub phantom: Option<bool>,

    /// Pad (on/off).
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub pad: Option<bool>,

    /// Low impedance (on/off).
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub low_z: Option<bool>,

    /// Active input: mic, line or di.
    #[arg(long)]
    pub input: Option<InputSource>,

    /// Connector: front or back.
    #[arg(long)]
    pub connection: Option<Connection>,

    /// Gain of the active input, clamped to its range.
    #[arg(long, allow_hyphen_values = true)]
    pub gain: Option<i32>,

    /// Mic gain, clamped to 0..=70.
    #[arg(long, allow_hyphen_values = true)]
    pub mic_gain: Option<i32>,

    /// Line gain, clamped to 0..=60.
    #[arg(long, allow_hyphen_values = true)]
    pub line_gain: Option<i32>,

    /// DI gain, clamped to 0..=255.
    #[arg(long, allow_hyphen_values = true)]
    pub di_gain: Option<i32>,

    /// Print the frame instead of sending it.
    #[arg(long)]
    pub dry_run: bool,
}

impl SetArgs {
    /// The requested changes.
    pub fn patch(&self) -> ChannelPatch {
        ChannelPatch {
            phantom: self.phantom,
            pad: self.pad,
            low_z: self.low_z,
            input: self.input,
            connection: self.connection,
            mic_gain: self.mic_gain,
            line_gain: self.line_gain,
            di_gain: self.di_gain,
            gain: self.gain,
        }
    }
}

#[derive(Args, Debug)]
pub struct GainArgs {
    /// Channel, 0 to 7.
    pub channel: u8,

    /// Gain of the active input, clamped to its range.
    #[arg(allow_hyphen_values = true)]
    pub value: i32,

    /// Print the frame instead of sending it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct PollArgs {
    /// Poll period in milliseconds (defaults to the heartbeat interval).
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Stop after this many polls.
    #[arg(long, short = 'n')]
    pub count: Option<u64>,
}
