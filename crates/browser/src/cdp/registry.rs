//! Session registry - session id to session facade
//!
//! `None` is the root session. Entries are created on first reference and
//! live until the owning target stops.

use dashmap::DashMap;
use std::sync::{Arc, Weak};

use super::protocol::{CDPEvent, SessionId};
use super::session::CDPSession;
use super::target::TargetInner;

pub struct SessionRegistry {
    target: Weak<TargetInner>,
    sessions: DashMap<Option<SessionId>, Arc<CDPSession>>,
}

impl SessionRegistry {
    pub(crate) fn new(target: Weak<TargetInner>) -> Self {
        Self {
            target,
            sessions: DashMap::new(),
        }
    }

    /// Existing session for `session_id`, or a freshly registered one
    pub fn get_or_create(&self, session_id: Option<&str>) -> Arc<CDPSession> {
        let key = session_id.map(str::to_owned);
        self.sessions
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!("Registering session {:?}", key);
                Arc::new(CDPSession::new(key, self.target.clone()))
            })
            .value()
            .clone()
    }

    pub fn get(&self, session_id: Option<&str>) -> Option<Arc<CDPSession>> {
        let key = session_id.map(str::to_owned);
        self.sessions.get(&key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session, listeners included
    pub fn clear(&self) {
        for entry in self.sessions.iter() {
            entry.value().del_all_listeners();
        }
        self.sessions.clear();
    }

    /// Route one event to the handler registered on its session
    pub(crate) fn dispatch(&self, event: CDPEvent) {
        match self.get(event.session_id.as_deref()) {
            Some(session) => session.handle_event(event),
            None => tracing::warn!(
                "Dropping {} for unregistered session {:?}",
                event.method,
                event.session_id
            ),
        }
    }
}
