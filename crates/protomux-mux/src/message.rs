use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;

use crate::channel::ChannelCore;
use crate::encoding::{encode_to_bytes, Encoding};
use crate::error::{EncodingError, MuxError, Result};

/// Type-erased receive side of a slot, as stored by the channel.
pub(crate) trait Deliver {
    /// Decode `payload` and hand it to the slot's handler, if one is set.
    fn deliver(&self, payload: Bytes) -> std::result::Result<(), EncodingError>;
}

struct SlotInner<E: Encoding> {
    channel: Weak<ChannelCore>,
    index: u32,
    encoding: E,
    on_message: RefCell<Option<Rc<dyn Fn(E::Value)>>>,
}

impl<E: Encoding> Deliver for SlotInner<E> {
    fn deliver(&self, payload: Bytes) -> std::result::Result<(), EncodingError> {
        let value = self.encoding.decode(payload)?;
        let handler = self.on_message.borrow().clone();
        if let Some(handler) = handler {
            handler(value);
        }
        Ok(())
    }
}

/// A typed message kind registered on a channel.
///
/// The slot index is its position in registration order; both peers must
/// register the same slots in the same order.
pub struct MessageSlot<E: Encoding> {
    inner: Rc<SlotInner<E>>,
}

impl<E: Encoding + 'static> MessageSlot<E> {
    pub(crate) fn new(channel: Weak<ChannelCore>, index: u32, encoding: E) -> Self {
        Self {
            inner: Rc::new(SlotInner {
                channel,
                index,
                encoding,
                on_message: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn as_deliver(&self) -> Rc<dyn Deliver> {
        self.inner.clone()
    }

    /// Encode `value` and send it to the paired remote channel.
    ///
    /// Fails with [`MuxError::InvalidState`] unless the channel is open.
    pub fn send(&self, value: &E::Value) -> Result<()> {
        let channel = self
            .inner
            .channel
            .upgrade()
            .ok_or(MuxError::ChannelDropped)?;
        let session = channel.session()?;
        let payload = encode_to_bytes(&self.inner.encoding, value)?;
        session.send_message(&channel, self.inner.index, payload)
    }

    /// Set the handler for incoming values, replacing any previous one.
    pub fn on_message(&self, handler: impl Fn(E::Value) + 'static) {
        *self.inner.on_message.borrow_mut() = Some(Rc::new(handler));
    }

    /// Remove the handler. Incoming values are decoded and discarded.
    pub fn clear_on_message(&self) {
        self.inner.on_message.borrow_mut().take();
    }

    pub fn has_handler(&self) -> bool {
        self.inner.on_message.borrow().is_some()
    }

    pub fn index(&self) -> u32 {
        self.inner.index
    }

    pub fn encoding(&self) -> &E {
        &self.inner.encoding
    }
}

impl<E: Encoding> Clone for MessageSlot<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Encoding> fmt::Debug for MessageSlot<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSlot")
            .field("index", &self.inner.index)
            .field("has_handler", &self.inner.on_message.borrow().is_some())
            .finish()
    }
}
