use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;

use protomux_transport::{Transport, TransportId};
use tracing::debug;

use crate::config::MuxConfig;
use crate::session::{Mux, MuxInner};

/// Registry of sessions keyed by [`TransportId`].
///
/// Every wrapper attached to the same transport shares one session and
/// therefore one channel id space. Entries are weak: a session is disposed
/// once the last [`Mux`] handle for it is dropped.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RefCell<HashMap<TransportId, Weak<MuxInner>>>,
    config: MuxConfig,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose new sessions all use `config`.
    pub fn with_config(config: MuxConfig) -> Self {
        Self {
            sessions: RefCell::new(HashMap::new()),
            config,
        }
    }

    /// Return the session for `transport`, creating it on first reference.
    ///
    /// When a live session already exists for the transport's id, the passed
    /// handle is dropped and the existing session is returned.
    pub fn attach<T: Transport + 'static>(&self, transport: T) -> Mux {
        let id = transport.id();
        if let Some(existing) = self.get(id) {
            debug!(transport = %id, "reusing session");
            return existing;
        }
        let mux = Mux::with_config(transport, self.config.clone());
        self.sessions.borrow_mut().insert(id, mux.downgrade());
        mux
    }

    /// Retrieve the session for `id` if it is still alive.
    pub fn get(&self, id: TransportId) -> Option<Mux> {
        let mut sessions = self.sessions.borrow_mut();
        let weak = sessions.get(&id)?;
        match weak.upgrade() {
            Some(inner) => Some(Mux::from_inner(inner)),
            None => {
                sessions.remove(&id);
                None
            }
        }
    }

    pub fn contains(&self, id: TransportId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.prune();
        self.sessions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries whose session has been dropped.
    pub fn prune(&self) {
        self.sessions
            .borrow_mut()
            .retain(|_, weak| weak.strong_count() > 0);
    }

    /// Prune stale entries, then return the ids of the live sessions.
    pub fn active_ids(&self) -> Vec<TransportId> {
        self.prune();
        let mut ids: Vec<_> = self.sessions.borrow().keys().copied().collect();
        ids.sort_by_key(|id| id.as_u64());
        ids
    }
}
