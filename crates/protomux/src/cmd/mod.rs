use std::io;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use protomux_mux::{ChannelOptions, Mux, Pump};
use protomux_transport::IoTransport;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one message on a channel.
    Send(SendArgs),
    /// Accept connections and print messages received on a channel.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Protocol name of the channel to open.
    #[arg(long, short = 'p')]
    pub protocol: String,
    /// Channel discriminator (UTF-8).
    #[arg(long, short = 'd')]
    pub discriminator: Option<String>,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one reply on the channel and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for pairing and replies (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Protocol name of the channel to open per connection.
    #[arg(long, short = 'p')]
    pub protocol: String,
    /// Channel discriminator (UTF-8).
    #[arg(long, short = 'd')]
    pub discriminator: Option<String>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Send every received message back to the sender.
    #[arg(long)]
    pub echo: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn channel_options(protocol: &str, discriminator: Option<&str>) -> ChannelOptions {
    let options = ChannelOptions::new(protocol);
    match discriminator {
        Some(discriminator) => options.discriminator(discriminator.as_bytes().to_vec()),
        None => options,
    }
}

/// Session over a connected socket: writes go through one handle, reads
/// through a cloned one.
pub(crate) fn session(stream: UnixStream) -> io::Result<(Mux, Pump<UnixStream>)> {
    let reader = stream.try_clone()?;
    Ok((Mux::new(IoTransport::new(stream)), Pump::new(reader)))
}
