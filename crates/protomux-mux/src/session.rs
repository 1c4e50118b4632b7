use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::{Bytes, BytesMut};
use protomux_frame::{encode_record, FrameDecoder, FrameError, Record};
use protomux_transport::{Transport, TransportId};
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelCore, ChannelOptions, ChannelState, PairKey};
use crate::config::MuxConfig;
use crate::encoding::{Encoding, Raw};
use crate::error::{MuxError, Result};

type PairHook = Rc<dyn Fn(&Mux, &str, Option<&Bytes>)>;

/// How a channel close is announced to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseMode {
    /// Closed on this side: send Close and hold the id until the peer answers.
    Initiate,
    /// The peer closed first: answer with Close and free the id.
    Answer,
    /// Rejected, or the session is gone: send nothing and free the id.
    Quiet,
}

// A locally closed id the peer may still address.
struct Closing {
    key: PairKey,
    remote: Option<u32>,
}

enum Pending {
    Channel(Rc<ChannelCore>),
    // Closed while still waiting for the remote Open.
    Closed(u32),
}

/// Shared session state behind every [`Mux`] handle.
pub(crate) struct MuxInner {
    transport: Rc<dyn Transport>,
    config: MuxConfig,
    decoder: RefCell<FrameDecoder>,
    state: RefCell<SessionState>,
}

struct SessionState {
    cork_depth: usize,
    out_buffer: BytesMut,
    next_id: u32,
    free_ids: Vec<u32>,
    local: HashMap<u32, Rc<ChannelCore>>,
    closing: HashMap<u32, Closing>,
    remote: HashMap<u32, u32>,
    pending: HashMap<PairKey, VecDeque<u32>>,
    pair_hooks: HashMap<PairKey, PairHook>,
    pending_destroy: Vec<Rc<ChannelCore>>,
    destroyed: bool,
}

impl SessionState {
    fn new(config: &MuxConfig) -> Self {
        Self {
            cork_depth: 0,
            out_buffer: BytesMut::with_capacity(config.initial_buffer_capacity),
            next_id: 1,
            free_ids: Vec::new(),
            local: HashMap::new(),
            closing: HashMap::new(),
            remote: HashMap::new(),
            pending: HashMap::new(),
            pair_hooks: HashMap::new(),
            pending_destroy: Vec::new(),
            destroyed: false,
        }
    }

    // Most recently freed id first.
    fn allocate_id(&mut self) -> u32 {
        if let Some(id) = self.free_ids.pop() {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // Drop a live channel. With `hold` the id keeps its pairing and its
    // place in the pending queue until the peer confirms the close, so
    // records still in flight for it are never routed to a new channel.
    fn retire(&mut self, core: &ChannelCore, hold: bool) {
        let Some(id) = core.local_id.get() else {
            return;
        };
        if self.local.remove(&id).is_none() {
            return;
        }
        let key = core.key();
        let remote = core.remote_id.get();
        if hold {
            self.closing.insert(id, Closing { key, remote });
        } else {
            self.forget(id, &key, remote);
            self.free_ids.push(id);
        }
    }

    // The peer will not address `id` again.
    fn release(&mut self, id: u32) {
        if let Some(closing) = self.closing.remove(&id) {
            self.forget(id, &closing.key, closing.remote);
            self.free_ids.push(id);
        }
    }

    fn forget(&mut self, id: u32, key: &PairKey, remote: Option<u32>) {
        if let Some(queue) = self.pending.get_mut(key) {
            queue.retain(|pending| *pending != id);
            if queue.is_empty() {
                self.pending.remove(key);
            }
        }
        if let Some(remote_id) = remote {
            self.remote.remove(&remote_id);
        }
    }

    fn closing_matches(&self, id: u32, key: &PairKey) -> bool {
        self.closing.get(&id).is_some_and(|closing| closing.key == *key)
    }

    // Oldest entry first. Closed entries still take part so both sides pair
    // the same Opens.
    fn take_pending(&mut self, key: &PairKey) -> Option<Pending> {
        let queue = self.pending.get_mut(key)?;
        let mut found = None;
        while let Some(id) = queue.pop_front() {
            if let Some(core) = self.local.get(&id) {
                if core.state.get() == ChannelState::Opening {
                    found = Some(Pending::Channel(Rc::clone(core)));
                    break;
                }
            } else if self
                .closing
                .get(&id)
                .is_some_and(|closing| closing.remote.is_none())
            {
                found = Some(Pending::Closed(id));
                break;
            }
        }
        if queue.is_empty() {
            self.pending.remove(key);
        }
        found
    }
}

/// A multiplexing session over one transport.
///
/// `Mux` is a cheap handle; clones share the same session. The session owns
/// its channels and outlives them only as long as some handle is alive.
#[derive(Clone)]
pub struct Mux {
    inner: Rc<MuxInner>,
}

impl Mux {
    /// Create a session over `transport` with default configuration.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(transport, MuxConfig::default())
    }

    /// Create a session over `transport` with explicit configuration.
    pub fn with_config(transport: impl Transport + 'static, config: MuxConfig) -> Self {
        let transport: Rc<dyn Transport> = Rc::new(transport);
        let decoder = FrameDecoder::with_config(config.frame.clone());
        let state = SessionState::new(&config);
        debug!(transport = %transport.id(), "session created");
        Self {
            inner: Rc::new(MuxInner {
                transport,
                config,
                decoder: RefCell::new(decoder),
                state: RefCell::new(state),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<MuxInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<MuxInner> {
        Rc::downgrade(&self.inner)
    }

    /// Create a channel for `protocol` with a raw handshake. No wire traffic.
    pub fn create_channel(&self, protocol: impl Into<String>) -> Channel {
        self.create_channel_with(ChannelOptions::new(protocol))
    }

    /// Create a channel from explicit options. No wire traffic.
    pub fn create_channel_with<H: Encoding + 'static>(
        &self,
        options: ChannelOptions<H>,
    ) -> Channel<H> {
        let core = ChannelCore::new(self.downgrade(), options.protocol, options.discriminator);
        Channel::new(Rc::new(core), options.handshake)
    }

    /// Shorthand for a raw-handshake channel with a discriminator.
    pub fn create_channel_for(
        &self,
        protocol: impl Into<String>,
        discriminator: impl Into<Bytes>,
    ) -> Channel<Raw> {
        self.create_channel_with(ChannelOptions::new(protocol).discriminator(discriminator))
    }

    /// Register a hook for remote Opens of `protocol`/`discriminator` that
    /// find no pending local channel.
    ///
    /// The hook runs before the Open is rejected and may create and open a
    /// matching channel, which is then paired.
    pub fn pair(
        &self,
        protocol: impl Into<String>,
        discriminator: Option<Bytes>,
        hook: impl Fn(&Mux, &str, Option<&Bytes>) + 'static,
    ) {
        let key = (protocol.into(), discriminator);
        self.inner
            .state
            .borrow_mut()
            .pair_hooks
            .insert(key, Rc::new(hook));
    }

    /// Remove a hook registered with [`pair`](Self::pair).
    pub fn unpair(&self, protocol: &str, discriminator: Option<&Bytes>) {
        let key = (protocol.to_string(), discriminator.cloned());
        self.inner.state.borrow_mut().pair_hooks.remove(&key);
    }

    /// Buffer outgoing frames until the matching [`uncork`](Self::uncork).
    pub fn cork(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.destroyed {
            return;
        }
        state.cork_depth += 1;
    }

    /// Release one cork level. At depth zero the buffered frames go out in a
    /// single transport write.
    pub fn uncork(&self) -> Result<()> {
        let (bytes, deferred) = {
            let mut state = self.inner.state.borrow_mut();
            if state.cork_depth == 0 {
                return Ok(());
            }
            state.cork_depth -= 1;
            if state.cork_depth > 0 {
                return Ok(());
            }
            let bytes = state.out_buffer.split().freeze();
            (bytes, std::mem::take(&mut state.pending_destroy))
        };

        let result = if bytes.is_empty() {
            Ok(())
        } else {
            trace!(size = bytes.len(), "flushing cork buffer");
            self.write_transport(bytes)
        };
        for core in deferred {
            core.fire_destroy();
        }
        result
    }

    /// Feed bytes received from the transport.
    ///
    /// Records are dispatched one by one as they are parsed, so handlers see
    /// the effects of earlier records in the same chunk. A framing error
    /// tears the session down and is returned.
    pub fn on_data(&self, chunk: &[u8]) -> Result<()> {
        if self.is_destroyed() {
            return Err(MuxError::SessionClosed);
        }
        self.inner.decoder.borrow_mut().push(chunk);

        loop {
            if self.is_destroyed() {
                return Ok(());
            }
            let next = self.inner.decoder.borrow_mut().next_record();
            match next {
                Ok(Some(record)) => self.dispatch(record)?,
                Ok(None) => return Ok(()),
                Err(err) => {
                    warn!(error = %err, "framing error, tearing down session");
                    self.teardown("framing error");
                    return Err(err.into());
                }
            }
        }
    }

    /// Signal that the transport ended. Every live channel is closed.
    pub fn on_end(&self) {
        if self.is_destroyed() {
            return;
        }
        if let Err(err) = self.inner.decoder.borrow_mut().finish() {
            warn!(error = %err, "transport ended mid-frame");
        }
        self.teardown("transport ended");
    }

    /// Tear the session down locally. Every live channel is closed and no
    /// further frames are written or processed.
    pub fn destroy(&self) {
        self.teardown("destroyed");
    }

    /// Whether an open channel exists for `protocol`/`discriminator`.
    pub fn opened(&self, protocol: &str, discriminator: Option<&[u8]>) -> bool {
        self.inner.state.borrow().local.values().any(|core| {
            core.state.get() == ChannelState::Open
                && core.protocol == protocol
                && core.discriminator.as_deref() == discriminator
        })
    }

    pub fn is_corked(&self) -> bool {
        self.inner.state.borrow().cork_depth > 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }

    /// Number of live channels. Ids of closed channels awaiting the peer's
    /// confirmation are not counted.
    pub fn channel_count(&self) -> usize {
        self.inner.state.borrow().local.len()
    }

    pub fn transport_id(&self) -> TransportId {
        self.inner.transport.id()
    }

    pub fn config(&self) -> &MuxConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same session.
    pub fn ptr_eq(&self, other: &Mux) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn open_channel(&self, core: &Rc<ChannelCore>, handshake: Option<Bytes>) -> Result<()> {
        let local_id = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return Err(MuxError::SessionClosed);
            }
            if core.state.get() != ChannelState::Created {
                return Err(core.invalid_state());
            }
            let id = state.allocate_id();
            core.local_id.set(Some(id));
            core.state.set(ChannelState::Opening);
            state.local.insert(id, Rc::clone(core));
            state.pending.entry(core.key()).or_default().push_back(id);
            id
        };

        debug!(
            protocol = %core.protocol,
            local_id,
            handshake = handshake.is_some(),
            "opening channel"
        );
        let record = Record::Open {
            channel: local_id,
            protocol: core.protocol.clone(),
            discriminator: core.discriminator.clone(),
            handshake,
        };
        match self.emit(&record) {
            Err(MuxError::Frame(err)) => {
                // Nothing reached the wire; leave the channel reusable.
                self.inner.state.borrow_mut().retire(core, false);
                core.local_id.set(None);
                core.state.set(ChannelState::Created);
                Err(err.into())
            }
            other => other,
        }
    }

    pub(crate) fn close_channel(&self, core: &Rc<ChannelCore>, mode: CloseMode) -> Result<()> {
        let previous = core.state.get();
        if matches!(previous, ChannelState::Closing | ChannelState::Closed) {
            return Ok(());
        }
        core.state.set(ChannelState::Closing);

        let announced = matches!(previous, ChannelState::Opening | ChannelState::Open);
        let notify = announced && mode != CloseMode::Quiet && !self.is_destroyed();
        let defer_destroy = {
            let mut state = self.inner.state.borrow_mut();
            state.retire(core, notify && mode == CloseMode::Initiate);
            state.cork_depth > 0
        };
        debug!(
            protocol = %core.protocol,
            local_id = ?core.local_id.get(),
            remote_id = ?core.remote_id.get(),
            ?mode,
            "closing channel"
        );

        let result = match core.local_id.get() {
            Some(channel) if notify => self.emit(&Record::Close {
                channel,
                protocol: core.protocol.clone(),
                discriminator: core.discriminator.clone(),
            }),
            _ => Ok(()),
        };

        core.state.set(ChannelState::Closed);
        core.fire_close();
        if defer_destroy && !self.is_destroyed() {
            self.inner.state.borrow_mut().pending_destroy.push(Rc::clone(core));
        } else {
            core.fire_destroy();
        }
        result
    }

    pub(crate) fn send_message(&self, core: &ChannelCore, index: u32, payload: Bytes) -> Result<()> {
        if core.state.get() != ChannelState::Open {
            return Err(core.invalid_state());
        }
        let Some(channel) = core.remote_id.get() else {
            return Err(core.invalid_state());
        };
        let record = Record::Message {
            channel,
            index,
            payload,
        };
        let max = self.inner.config.frame.max_payload_size;
        if record.body_len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: record.body_len(),
                max,
            }
            .into());
        }
        trace!(
            protocol = %core.protocol,
            remote_id = channel,
            index,
            size = record.body_len() - 4,
            "sending message"
        );
        self.emit(&record)
    }

    // Encode one record, into the cork buffer or straight to the transport.
    fn emit(&self, record: &Record) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return Err(MuxError::SessionClosed);
            }
            if state.cork_depth > 0 {
                encode_record(record, &mut state.out_buffer)?;
                return Ok(());
            }
        }
        let bytes = record.to_bytes()?;
        self.write_transport(bytes)
    }

    fn write_transport(&self, bytes: Bytes) -> Result<()> {
        self.inner.transport.write(bytes).map_err(|err| {
            warn!(error = %err, "transport write failed, tearing down session");
            self.teardown("transport write failed");
            MuxError::from(err)
        })
    }

    fn dispatch(&self, record: Record) -> Result<()> {
        match record {
            Record::Open {
                channel,
                protocol,
                discriminator,
                handshake,
            } => self.on_remote_open(channel, (protocol, discriminator), handshake),
            Record::Close {
                channel,
                protocol,
                discriminator,
            } => self.on_remote_close(channel, (protocol, discriminator)),
            Record::Reject {
                channel,
                protocol,
                discriminator,
            } => self.on_remote_reject(channel, (protocol, discriminator)),
            Record::Message {
                channel,
                index,
                payload,
            } => self.on_remote_message(channel, index, payload),
        }
    }

    fn on_remote_open(&self, remote_id: u32, key: PairKey, handshake: Option<Bytes>) -> Result<()> {
        let (mut matched, hook) = {
            let mut state = self.inner.state.borrow_mut();
            if state.remote.contains_key(&remote_id) {
                warn!(remote_id, protocol = %key.0, "open reuses a paired remote id, ignored");
                return Ok(());
            }
            match state.take_pending(&key) {
                Some(pending) => (Some(pending), None),
                None => (None, state.pair_hooks.get(&key).cloned()),
            }
        };

        if let Some(hook) = hook {
            hook(self, &key.0, key.1.as_ref());
            matched = self.inner.state.borrow_mut().take_pending(&key);
        }

        let core = match matched {
            Some(Pending::Channel(core)) => core,
            Some(Pending::Closed(local_id)) => {
                // Our Close is already on the wire; the peer answers it.
                let mut state = self.inner.state.borrow_mut();
                if let Some(closing) = state.closing.get_mut(&local_id) {
                    closing.remote = Some(remote_id);
                }
                state.remote.insert(remote_id, local_id);
                debug!(protocol = %key.0, local_id, remote_id, "open matched a closed channel");
                return Ok(());
            }
            None => {
                debug!(protocol = %key.0, remote_id, "no local channel, rejecting");
                return self.emit(&Record::Reject {
                    channel: remote_id,
                    protocol: key.0,
                    discriminator: key.1,
                });
            }
        };

        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(local_id) = core.local_id.get() {
                state.remote.insert(remote_id, local_id);
            }
        }
        core.remote_id.set(Some(remote_id));
        core.state.set(ChannelState::Open);
        debug!(
            protocol = %core.protocol,
            local_id = ?core.local_id.get(),
            remote_id,
            "channel paired"
        );

        if let Err(err) = core.fire_open(handshake) {
            warn!(protocol = %core.protocol, error = %err, "bad handshake, closing channel");
            return self.close_channel(&core, CloseMode::Initiate);
        }
        Ok(())
    }

    fn on_remote_close(&self, remote_id: u32, key: PairKey) -> Result<()> {
        let core = {
            let mut state = self.inner.state.borrow_mut();
            let Some(local_id) = state.remote.get(&remote_id).copied() else {
                trace!(remote_id, protocol = %key.0, "close for unknown channel ignored");
                return Ok(());
            };
            let live = state.local.get(&local_id).cloned();
            match live {
                Some(core) if core.matches(&key) => Some(core),
                Some(_) => None,
                None if state.closing_matches(local_id, &key) => {
                    debug!(protocol = %key.0, local_id, remote_id, "close confirmed");
                    state.release(local_id);
                    return Ok(());
                }
                None => None,
            }
        };
        match core {
            Some(core) => self.close_channel(&core, CloseMode::Answer),
            None => {
                warn!(remote_id, protocol = %key.0, "close names another channel, ignored");
                Ok(())
            }
        }
    }

    fn on_remote_reject(&self, local_id: u32, key: PairKey) -> Result<()> {
        let core = {
            let mut state = self.inner.state.borrow_mut();
            let live = state.local.get(&local_id).cloned();
            match live {
                Some(core) if core.state.get() == ChannelState::Opening && core.matches(&key) => {
                    Some(core)
                }
                Some(_) => None,
                None if state.closing_matches(local_id, &key) => {
                    debug!(protocol = %key.0, local_id, "reject confirmed close");
                    state.release(local_id);
                    return Ok(());
                }
                None => None,
            }
        };
        match core {
            Some(core) => {
                debug!(protocol = %core.protocol, local_id, "channel rejected");
                self.close_channel(&core, CloseMode::Quiet)
            }
            None => {
                debug!(local_id, protocol = %key.0, "stale reject ignored");
                Ok(())
            }
        }
    }

    fn on_remote_message(&self, local_id: u32, index: u32, payload: Bytes) -> Result<()> {
        let core = self.inner.state.borrow().local.get(&local_id).cloned();
        let Some(core) = core.filter(|core| core.state.get() == ChannelState::Open) else {
            trace!(local_id, index, "message for closed or unknown channel dropped");
            return Ok(());
        };
        let Some(slot) = core.slot(index) else {
            trace!(protocol = %core.protocol, local_id, index, "unknown message index dropped");
            return Ok(());
        };

        trace!(protocol = %core.protocol, local_id, index, size = payload.len(), "message received");
        if let Err(err) = slot.deliver(payload) {
            warn!(
                protocol = %core.protocol,
                local_id,
                index,
                error = %err,
                "undecodable message, closing channel"
            );
            return self.close_channel(&core, CloseMode::Initiate);
        }
        Ok(())
    }

    fn teardown(&self, reason: &'static str) {
        let (mut channels, deferred) = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.cork_depth = 0;
            state.out_buffer.clear();
            state.remote.clear();
            state.pending.clear();
            state.closing.clear();
            state.pair_hooks.clear();
            state.free_ids.clear();
            let channels: Vec<_> = state.local.drain().map(|(_, core)| core).collect();
            (channels, std::mem::take(&mut state.pending_destroy))
        };
        channels.sort_by_key(|core| core.local_id.get());
        debug!(
            transport = %self.inner.transport.id(),
            reason,
            channels = channels.len(),
            "session torn down"
        );

        for core in deferred {
            core.fire_destroy();
        }
        for core in channels {
            if matches!(core.state.get(), ChannelState::Closing | ChannelState::Closed) {
                continue;
            }
            core.state.set(ChannelState::Closed);
            core.fire_close();
            core.fire_destroy();
        }
    }
}

impl fmt::Debug for Mux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Mux")
            .field("transport", &self.inner.transport.id())
            .field("channels", &state.local.len())
            .field("closing", &state.closing.len())
            .field("cork_depth", &state.cork_depth)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
