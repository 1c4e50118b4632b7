#![cfg(feature = "async")]

use std::cell::RefCell;
use std::rc::Rc;

use protomux_mux::{drive_async, Mux, Utf8};
use protomux_transport::{forward_writes, QueueTransport};

#[tokio::test]
async fn sessions_talk_over_duplex_stream() {
    let (left_io, right_io) = tokio::io::duplex(4096);
    let (left_read, left_write) = tokio::io::split(left_io);
    let (right_read, right_write) = tokio::io::split(right_io);

    let (left_transport, left_rx) = QueueTransport::new();
    let (right_transport, right_rx) = QueueTransport::new();
    tokio::spawn(forward_writes(left_rx, left_write));
    tokio::spawn(forward_writes(right_rx, right_write));

    let a = Mux::new(left_transport);
    let b = Mux::new(right_transport);

    let left = a.create_channel("chat");
    let right = b.create_channel("chat");
    let outbox = left.add_message(Utf8);
    let inbox = right.add_message(Utf8);

    let sender = outbox.clone();
    left.on_open(move |_| sender.send(&"hello over tokio".to_string()).unwrap());

    // Receiver closes its channel, which tears the sender down in turn.
    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    let channel = right.clone();
    let right_mux = b.clone();
    inbox.on_message(move |value| {
        sink.borrow_mut().push(value);
        channel.close().unwrap();
        right_mux.destroy();
    });
    let left_mux = a.clone();
    left.on_close(move || left_mux.destroy());

    left.open().unwrap();
    right.open().unwrap();

    let (left_result, right_result) =
        tokio::join!(drive_async(left_read, &a), drive_async(right_read, &b));
    left_result.unwrap();
    right_result.unwrap();

    assert_eq!(*received.borrow(), vec!["hello over tokio".to_string()]);
    assert!(a.is_destroyed() && b.is_destroyed());
    assert!(left.is_closed() && right.is_closed());
}
