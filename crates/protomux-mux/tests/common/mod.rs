#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use protomux_mux::Mux;
use protomux_transport::MemoryTransport;

/// One end of an in-memory connection.
pub struct Side {
    pub mux: Mux,
    pub transport: MemoryTransport,
}

/// Two sessions linked by an in-memory transport pair.
pub fn pair() -> (Side, Side) {
    let (left, right) = MemoryTransport::pair();
    (
        Side {
            mux: Mux::new(left.clone()),
            transport: left,
        },
        Side {
            mux: Mux::new(right.clone()),
            transport: right,
        },
    )
}

/// Deliver everything written so far, in both directions, until neither side
/// has anything left to read.
pub fn replicate(a: &Side, b: &Side) {
    loop {
        let mut moved = false;
        for side in [a, b] {
            while let Some(chunk) = side.transport.recv() {
                moved = true;
                if side.mux.is_destroyed() {
                    continue;
                }
                side.mux.on_data(&chunk).expect("on_data");
            }
        }
        if !moved {
            break;
        }
    }
}

/// Shared log that handlers can append to.
pub fn log<T>() -> Rc<RefCell<Vec<T>>> {
    Rc::new(RefCell::new(Vec::new()))
}
