//! Bounded log of delivered messages
//!
//! A key is claimed before a message is processed and committed only after
//! its row was appended. Dropping the claim without committing releases it,
//! so a failed message can be resent. Recorded keys are kept in FIFO order
//! up to `capacity`; the oldest are forgotten first.

use crate::domain::types::DeliveryKey;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// Why a key could not be claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    /// A row already exists for this message
    Recorded,
    /// Another handler is processing this message right now
    InFlight,
}

#[derive(Default)]
struct Inner {
    recorded: FxHashSet<DeliveryKey>,
    order: VecDeque<DeliveryKey>,
    in_flight: FxHashSet<DeliveryKey>,
}

pub struct DeliveryLog {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl DeliveryLog {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner::default()), capacity: capacity.max(1) }
    }

    /// Claim `key` for processing
    pub fn begin(&self, key: DeliveryKey) -> Result<Claim<'_>, Seen> {
        let mut inner = self.inner.lock();
        if inner.recorded.contains(&key) {
            return Err(Seen::Recorded);
        }
        if !inner.in_flight.insert(key) {
            return Err(Seen::InFlight);
        }
        Ok(Claim { log: self, key, committed: false })
    }

    pub fn contains(&self, key: &DeliveryKey) -> bool {
        self.inner.lock().recorded.contains(key)
    }

    /// Number of remembered recorded keys
    pub fn len(&self) -> usize {
        self.inner.lock().recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn commit(&self, key: DeliveryKey) {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(&key);
        if inner.recorded.insert(key) {
            inner.order.push_back(key);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.recorded.remove(&oldest);
            }
        }
    }

    fn release(&self, key: DeliveryKey) {
        self.inner.lock().in_flight.remove(&key);
    }
}

/// An in-flight claim on one delivery key. Released on drop unless committed.
pub struct Claim<'a> {
    log: &'a DeliveryLog,
    key: DeliveryKey,
    committed: bool,
}

impl Claim<'_> {
    /// Mark the message as recorded
    pub fn commit(mut self) {
        self.committed = true;
        self.log.commit(self.key);
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.log.release(self.key);
        }
    }
}
