use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;

use crate::encoding::{encode_to_bytes, Encoding, Raw};
use crate::error::{EncodingError, MuxError, Result};
use crate::message::{Deliver, MessageSlot};
use crate::session::{CloseMode, Mux, MuxInner};

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created, `open()` not called yet.
    Created,
    /// Open record sent, waiting for the remote Open.
    Opening,
    /// Paired with a remote channel.
    Open,
    /// Teardown in progress.
    Closing,
    /// Closed; terminal.
    Closed,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Created => "created",
            ChannelState::Opening => "opening",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pairing key: protocol name plus optional discriminator.
pub(crate) type PairKey = (String, Option<Bytes>);

type OpenHandler = Rc<dyn Fn(Option<Bytes>) -> std::result::Result<(), EncodingError>>;
type Handler = Rc<dyn Fn()>;

/// Session-owned state of one channel.
pub(crate) struct ChannelCore {
    mux: Weak<MuxInner>,
    pub(crate) protocol: String,
    pub(crate) discriminator: Option<Bytes>,
    pub(crate) state: Cell<ChannelState>,
    pub(crate) local_id: Cell<Option<u32>>,
    pub(crate) remote_id: Cell<Option<u32>>,
    slots: RefCell<Vec<Rc<dyn Deliver>>>,
    on_open: RefCell<Option<OpenHandler>>,
    on_close: RefCell<Option<Handler>>,
    on_destroy: RefCell<Option<Handler>>,
}

impl ChannelCore {
    pub(crate) fn new(mux: Weak<MuxInner>, protocol: String, discriminator: Option<Bytes>) -> Self {
        Self {
            mux,
            protocol,
            discriminator,
            state: Cell::new(ChannelState::Created),
            local_id: Cell::new(None),
            remote_id: Cell::new(None),
            slots: RefCell::new(Vec::new()),
            on_open: RefCell::new(None),
            on_close: RefCell::new(None),
            on_destroy: RefCell::new(None),
        }
    }

    pub(crate) fn key(&self) -> PairKey {
        (self.protocol.clone(), self.discriminator.clone())
    }

    pub(crate) fn matches(&self, key: &PairKey) -> bool {
        self.protocol == key.0 && self.discriminator == key.1
    }

    pub(crate) fn session(&self) -> Result<Mux> {
        self.mux
            .upgrade()
            .map(Mux::from_inner)
            .ok_or(MuxError::SessionClosed)
    }

    pub(crate) fn invalid_state(&self) -> MuxError {
        MuxError::InvalidState {
            protocol: self.protocol.clone(),
            state: self.state.get(),
        }
    }

    pub(crate) fn slot(&self, index: u32) -> Option<Rc<dyn Deliver>> {
        self.slots.borrow().get(index as usize).cloned()
    }

    // Handlers are cloned out before the call so they may replace themselves.
    pub(crate) fn fire_open(&self, handshake: Option<Bytes>) -> std::result::Result<(), EncodingError> {
        let handler = self.on_open.borrow().clone();
        match handler {
            Some(handler) => handler(handshake),
            None => Ok(()),
        }
    }

    pub(crate) fn fire_close(&self) {
        let handler = self.on_close.borrow().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub(crate) fn fire_destroy(&self) {
        let handler = self.on_destroy.borrow().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// Options for [`Mux::create_channel_with`].
#[derive(Debug, Clone)]
pub struct ChannelOptions<H = Raw> {
    pub protocol: String,
    pub discriminator: Option<Bytes>,
    pub handshake: H,
}

impl ChannelOptions<Raw> {
    /// Options for `protocol` with no discriminator and a raw handshake.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            discriminator: None,
            handshake: Raw,
        }
    }
}

impl<H> ChannelOptions<H> {
    /// Distinguish this channel from others with the same protocol.
    pub fn discriminator(mut self, discriminator: impl Into<Bytes>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    /// Use `encoding` for the handshake values exchanged on open.
    pub fn handshake<H2: Encoding>(self, encoding: H2) -> ChannelOptions<H2> {
        ChannelOptions {
            protocol: self.protocol,
            discriminator: self.discriminator,
            handshake: encoding,
        }
    }
}

/// One logical sub-protocol session on a [`Mux`].
///
/// Cloning yields another handle to the same channel. The session keeps the
/// channel alive while it holds a local id; dropping every handle does not
/// close it.
pub struct Channel<H: Encoding = Raw> {
    core: Rc<ChannelCore>,
    handshake: Rc<H>,
}

impl<H: Encoding + 'static> Channel<H> {
    pub(crate) fn new(core: Rc<ChannelCore>, handshake: H) -> Self {
        Self {
            core,
            handshake: Rc::new(handshake),
        }
    }

    /// Announce the channel to the remote without a handshake value.
    pub fn open(&self) -> Result<()> {
        self.core.session()?.open_channel(&self.core, None)
    }

    /// Announce the channel with a handshake value for the remote's `onopen`.
    pub fn open_with(&self, handshake: &H::Value) -> Result<()> {
        let session = self.core.session()?;
        let bytes = encode_to_bytes(self.handshake.as_ref(), handshake)?;
        session.open_channel(&self.core, Some(bytes))
    }

    /// Close the channel. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        match self.core.session() {
            Ok(session) => session.close_channel(&self.core, CloseMode::Initiate),
            Err(_) => {
                // Session gone: nothing to announce, only local teardown.
                if !matches!(
                    self.core.state.get(),
                    ChannelState::Closing | ChannelState::Closed
                ) {
                    self.core.state.set(ChannelState::Closed);
                    self.core.fire_close();
                    self.core.fire_destroy();
                }
                Ok(())
            }
        }
    }

    /// Register the next message slot. Indices follow registration order.
    pub fn add_message<E>(&self, encoding: E) -> MessageSlot<E>
    where
        E: Encoding + 'static,
    {
        let mut slots = self.core.slots.borrow_mut();
        let index = slots.len() as u32;
        let slot = MessageSlot::new(Rc::downgrade(&self.core), index, encoding);
        slots.push(slot.as_deliver());
        slot
    }

    /// Called once when the channel pairs, with the remote's handshake.
    pub fn on_open(&self, handler: impl Fn(Option<H::Value>) + 'static) {
        let encoding = Rc::clone(&self.handshake);
        let handler: OpenHandler = Rc::new(move |raw: Option<Bytes>| {
            let value = raw.map(|bytes| encoding.decode(bytes)).transpose()?;
            handler(value);
            Ok(())
        });
        *self.core.on_open.borrow_mut() = Some(handler);
    }

    /// Called once when the channel closes, for any reason.
    pub fn on_close(&self, handler: impl Fn() + 'static) {
        *self.core.on_close.borrow_mut() = Some(Rc::new(handler));
    }

    /// Called once after `onclose`, when frames buffered by a cork are out.
    pub fn on_destroy(&self, handler: impl Fn() + 'static) {
        *self.core.on_destroy.borrow_mut() = Some(Rc::new(handler));
    }

    /// Cork the owning session.
    pub fn cork(&self) -> Result<()> {
        self.core.session()?.cork();
        Ok(())
    }

    /// Uncork the owning session.
    pub fn uncork(&self) -> Result<()> {
        self.core.session()?.uncork()
    }

    pub fn state(&self) -> ChannelState {
        self.core.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    pub fn local_id(&self) -> Option<u32> {
        self.core.local_id.get()
    }

    pub fn remote_id(&self) -> Option<u32> {
        self.core.remote_id.get()
    }

    pub fn protocol(&self) -> &str {
        &self.core.protocol
    }

    pub fn discriminator(&self) -> Option<&Bytes> {
        self.core.discriminator.as_ref()
    }

    /// Number of registered message slots.
    pub fn message_count(&self) -> usize {
        self.core.slots.borrow().len()
    }

    /// The session this channel belongs to, if it is still alive.
    pub fn mux(&self) -> Option<Mux> {
        self.core.session().ok()
    }
}

impl<H: Encoding> Clone for Channel<H> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            handshake: Rc::clone(&self.handshake),
        }
    }
}

impl<H: Encoding> fmt::Debug for Channel<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("protocol", &self.core.protocol)
            .field("discriminator", &self.core.discriminator)
            .field("state", &self.core.state.get())
            .field("local_id", &self.core.local_id.get())
            .field("remote_id", &self.core.remote_id.get())
            .finish()
    }
}
