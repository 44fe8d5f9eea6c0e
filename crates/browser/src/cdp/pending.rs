//! Pending-call table
//!
//! One one-shot slot per outstanding request id. The slot is registered before
//! the request hits the wire so a fast reply can never miss it.

use dashmap::DashMap;
use tokio::sync::oneshot;

use super::protocol::{CDPResponse, RequestId};

#[derive(Default)]
pub struct PendingCalls {
    slots: DashMap<RequestId, oneshot::Sender<CDPResponse>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `id`
    ///
    /// The returned guard removes the slot when dropped, whatever the exit
    /// path of the caller.
    pub fn register(&self, id: RequestId) -> PendingCall<'_> {
        let (tx, rx) = oneshot::channel();
        let previous = self.slots.insert(id, tx);
        debug_assert!(previous.is_none(), "request id {} reused while pending", id);
        PendingCall {
            id,
            rx,
            table: self,
        }
    }

    /// Hand a reply to its waiting caller
    ///
    /// Returns false when nobody waits for this id any more.
    pub fn deliver(&self, response: CDPResponse) -> bool {
        match self.slots.remove(&response.id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A registered slot, owned by the waiting caller
pub struct PendingCall<'a> {
    id: RequestId,
    pub(crate) rx: oneshot::Receiver<CDPResponse>,
    table: &'a PendingCalls,
}

impl PendingCall<'_> {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.table.slots.remove(&self.id);
    }
}
