//! Correlation table - pending requests keyed by request id.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{BusError, RoutingError};
use crate::message::Message;

type Slot<M> = mpsc::UnboundedSender<Result<M, BusError>>;
pub(crate) type SlotReceiver<M> = mpsc::UnboundedReceiver<Result<M, BusError>>;

/// Routes incoming responses to the caller awaiting them.
///
/// Written to by the send path (`register`) and the receive path
/// (`dispatch`) concurrently; each operation holds the lock for its whole
/// check-and-mutate step.
pub(crate) struct CorrelationTable<M> {
    /// Stamped on outgoing requests by the owning bus.
    requester_id: String,
    entries: Mutex<HashMap<String, Slot<M>>>,
}

impl<M: Message> CorrelationTable<M> {
    pub(crate) fn new(requester_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            requester_id: requester_id.into(),
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// True when `response` answers a request sent through this table.
    ///
    /// Buses sharing a response topic all see every response. One is kept
    /// when it names this requester, names none, or matches a pending entry
    /// (a caller may stamp a requester id of its own).
    pub(crate) fn is_addressed_here(&self, response: &M) -> bool {
        let Some(correlation) = response.correlation() else {
            return true;
        };
        if correlation.requester_id.is_empty() || correlation.requester_id == self.requester_id {
            return true;
        }
        self.entries.lock().contains_key(&correlation.request_id)
    }

    /// Add an entry for `request_id`; refused while one is already pending.
    pub(crate) fn register(
        self: &Arc<Self>,
        request_id: &str,
    ) -> Result<(SlotReceiver<M>, CorrelationGuard<M>), RoutingError> {
        let mut entries = self.entries.lock();
        match entries.entry(request_id.to_string()) {
            Entry::Occupied(_) => Err(RoutingError::DuplicateRequestId(request_id.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(tx);
                let guard = CorrelationGuard {
                    table: Arc::downgrade(self),
                    request_id: request_id.to_string(),
                };
                Ok((rx, guard))
            }
        }
    }

    /// Forward a response to its pending entry. Returns true if one matched.
    pub(crate) fn dispatch(&self, response: &M) -> bool {
        let Some(request_id) = response.request_id() else {
            return false;
        };
        let mut entries = self.entries.lock();
        let delivered = match entries.get(request_id) {
            Some(slot) => slot.send(Ok(response.clone())).is_ok(),
            None => return false,
        };
        if !delivered {
            entries.remove(request_id);
        }
        delivered
    }

    /// Report a failure to every pending entry.
    pub(crate) fn fail_all(&self, error: &BusError) {
        for slot in self.entries.lock().values() {
            let _ = slot.send(Err(error.clone()));
        }
    }

    /// Drop every entry, completing their streams.
    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Removes its correlation entry when dropped.
pub(crate) struct CorrelationGuard<M> {
    table: Weak<CorrelationTable<M>>,
    request_id: String,
}

impl<M> Drop for CorrelationGuard<M> {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.entries.lock().remove(&self.request_id);
        }
    }
}
