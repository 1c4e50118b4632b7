//! Two protocols on one connection: a JSON command channel and a binary data
//! channel, each side driven by its own thread.
//!
//! Run with:
//!   cargo run --example multi-channel

use std::os::unix::net::UnixStream;
use std::thread;

use bytes::Bytes;
use protomux::mux::{Json, Pump, Raw, Utf8};
use protomux::transport::IoTransport;
use protomux::Mux;
use serde_json::json;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    let (server_stream, client_stream) = UnixStream::pair()?;

    let server = thread::spawn(move || -> Result<(), BoxError> {
        let mut pump = Pump::new(server_stream.try_clone()?);
        let mux = Mux::new(IoTransport::new(server_stream));

        let commands = mux.create_channel("demo/command");
        let command_slot = commands.add_message(Json::<serde_json::Value>::new());
        let ack_slot = commands.add_message(Utf8);
        let ack = ack_slot.clone();
        command_slot.on_message(move |value| {
            eprintln!("[server] command: {value}");
            let _ = ack.send(&"ok".to_string());
        });

        let data = mux.create_channel("demo/data");
        data.add_message(Raw)
            .on_message(|bytes: Bytes| eprintln!("[server] data: {} bytes", bytes.len()));

        commands.open()?;
        data.open()?;
        pump.run(&mux)?;
        eprintln!("[server] connection closed");
        Ok(())
    });

    let mut pump = Pump::new(client_stream.try_clone()?);
    let mux = Mux::new(IoTransport::new(client_stream.try_clone()?));

    let commands = mux.create_channel("demo/command");
    let command_slot = commands.add_message(Json::<serde_json::Value>::new());
    let ack_slot = commands.add_message(Utf8);
    ack_slot.on_message(|reply| eprintln!("[client] ack: {reply}"));
    let data = mux.create_channel("demo/data");
    let data_slot = data.add_message(Raw);

    commands.open()?;
    data.open()?;
    while !(commands.is_open() && data.is_open()) {
        if !pump.step(&mux)? {
            return Err("server went away before pairing".into());
        }
    }

    mux.cork();
    command_slot.send(&json!({ "op": "start", "id": 1 }))?;
    data_slot.send(&Bytes::from(vec![0xAB; 256]))?;
    mux.uncork()?;

    // Wait for the acknowledgement, then hang up.
    pump.step(&mux)?;
    commands.close()?;
    data.close()?;
    client_stream.shutdown(std::net::Shutdown::Both)?;

    server
        .join()
        .map_err(|_| "server thread panicked")??;
    Ok(())
}
