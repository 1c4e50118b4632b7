//! Two sessions on a tokio runtime, connected by an in-memory duplex stream.
//!
//! Run with:
//!   cargo run --example async-chat --features async

use protomux::mux::{drive_async, Utf8};
use protomux::transport::{forward_writes, QueueTransport};
use protomux::Mux;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (left_io, right_io) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left_io);
    let (right_read, right_write) = tokio::io::split(right_io);

    let (left_transport, left_rx) = QueueTransport::new();
    let (right_transport, right_rx) = QueueTransport::new();
    tokio::spawn(forward_writes(left_rx, left_write));
    tokio::spawn(forward_writes(right_rx, right_write));

    let alice = Mux::new(left_transport);
    let bob = Mux::new(right_transport);

    let alice_chat = alice.create_channel("chat");
    let bob_chat = bob.create_channel("chat");
    let say = alice_chat.add_message(Utf8);
    let hear = bob_chat.add_message(Utf8);

    let greeting = say.clone();
    alice_chat.on_open(move |_| {
        let _ = greeting.send(&"hello bob".to_string());
    });

    let bob_handle = bob.clone();
    let bob_channel = bob_chat.clone();
    hear.on_message(move |text| {
        println!("bob heard: {text}");
        let _ = bob_channel.close();
        bob_handle.destroy();
    });
    let alice_handle = alice.clone();
    alice_chat.on_close(move || alice_handle.destroy());

    alice_chat.open()?;
    bob_chat.open()?;

    let (alice_result, bob_result) =
        tokio::join!(drive_async(left_read, &alice), drive_async(right_read, &bob));
    alice_result?;
    bob_result?;
    Ok(())
}
