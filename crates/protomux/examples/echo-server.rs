//! Minimal echo server: accepts one connection and echoes every message on
//! the `echo` channel back to the sender.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send /tmp/protomux-echo-<pid>/echo.sock \
//!     --protocol echo --json '{"hello":"world"}' --wait --wait-timeout 3s

use std::fs;
use std::os::unix::net::UnixListener;

use protomux::mux::{Pump, Raw};
use protomux::transport::IoTransport;
use protomux::Mux;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("protomux-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");
    let _ = fs::remove_file(&sock_path);

    let listener = UnixListener::bind(&sock_path)?;
    eprintln!("Listening on {}", sock_path.display());

    let (stream, _) = listener.accept()?;
    let mut pump = Pump::new(stream.try_clone()?);
    let mux = Mux::new(IoTransport::new(stream));
    eprintln!("Connection accepted: {}", mux.transport_id());

    let channel = mux.create_channel("echo");
    let slot = channel.add_message(Raw);
    let echo = slot.clone();
    slot.on_message(move |payload| {
        eprintln!("Received {} bytes", payload.len());
        if let Err(err) = echo.send(&payload) {
            eprintln!("Echo failed: {err}");
        }
    });
    channel.on_close(|| eprintln!("Channel closed"));
    channel.open()?;

    pump.run(&mux)?;

    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
