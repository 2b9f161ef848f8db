//! PushQueue — per-key superseding push queue with retry backoff.
//!
//! Each key owns one slot holding at most one queued value and at most one
//! in-flight value. A newer enqueue replaces the queued value, so the remote
//! never receives a value older than one already enqueued for the same key.
//! Keys become ready in FIFO order of their first enqueue.
//!
//! The queue is plain data guarded by the coordinator's mutex. It never
//! blocks and never performs I/O.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::types::{FieldEntry, FieldKey, PushSnapshot, Timestamp};

use super::types::PushOutcome;

/// A value waiting to be pushed, with the snapshot guard it was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPush {
    pub category: String,
    pub value: String,
    pub modified_at: Timestamp,
}

impl PendingPush {
    pub fn from_entry(entry: &FieldEntry) -> Self {
        Self {
            category: entry.category.clone(),
            value: entry.value.clone(),
            modified_at: entry.last_modified_at,
        }
    }

    pub fn snapshot(&self) -> PushSnapshot {
        PushSnapshot {
            value: self.value.clone(),
            modified_at: self.modified_at,
        }
    }

    /// True when `self` is not newer than `other`.
    fn is_covered_by(&self, other: &PendingPush) -> bool {
        self.modified_at < other.modified_at || self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueEffect {
    /// The key had nothing queued.
    Queued,
    /// A queued value for the key was replaced.
    Superseded,
    /// The value is not newer than the one already queued or in flight.
    Stale,
}

#[derive(Default)]
struct Slot {
    pending: Option<PendingPush>,
    in_flight: Option<PendingPush>,
    /// Consecutive retryable failures.
    attempts: u32,
    not_before: Option<Instant>,
    waiters: Vec<oneshot::Sender<PushOutcome>>,
}

impl Slot {
    fn is_idle(&self) -> bool {
        self.pending.is_none() && self.in_flight.is_none() && self.waiters.is_empty()
    }
}

/// Exponential retry delay: `base * 2^(attempts - 1)`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exp).min(max)
}

pub struct PushQueue {
    slots: HashMap<FieldKey, Slot>,
    /// Keys with a queued value and nothing in flight.
    order: VecDeque<FieldKey>,
    /// Last value the remote refused per key; it is never pushed again.
    rejected: HashMap<FieldKey, PendingPush>,
    retry_base: Duration,
    retry_max: Duration,
}

impl PushQueue {
    pub fn new(retry_base: Duration, retry_max: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            order: VecDeque::new(),
            rejected: HashMap::new(),
            retry_base,
            retry_max,
        }
    }

    /// Queue `push` for `key`. A fresh enqueue is attempted without waiting
    /// out any backoff left by earlier failures.
    pub fn enqueue(&mut self, key: &FieldKey, push: PendingPush) -> EnqueueEffect {
        match self.rejected.get(key) {
            Some(rejected) if push.is_covered_by(rejected) => return EnqueueEffect::Stale,
            Some(_) => {
                self.rejected.remove(key);
            }
            None => {}
        }

        let slot = self.slots.entry(key.clone()).or_default();

        if let Some(in_flight) = &slot.in_flight {
            if push.is_covered_by(in_flight) {
                return EnqueueEffect::Stale;
            }
        }

        let effect = match &slot.pending {
            Some(pending) if push.is_covered_by(pending) && &push != pending => {
                return EnqueueEffect::Stale;
            }
            Some(_) => EnqueueEffect::Superseded,
            None => EnqueueEffect::Queued,
        };

        slot.pending = Some(push);
        slot.not_before = None;
        if effect == EnqueueEffect::Queued && slot.in_flight.is_none() {
            self.order.push_back(key.clone());
        }
        effect
    }

    /// Take the first ready key, marking its value in flight.
    pub fn take_ready(&mut self, now: Instant) -> Option<(FieldKey, PendingPush)> {
        let slots = &self.slots;
        let index = self.order.iter().position(|key| {
            slots
                .get(key)
                .map_or(false, |s| s.not_before.map_or(true, |t| t <= now))
        })?;
        let key = self.order.remove(index)?;
        let slot = self.slots.get_mut(&key)?;
        let push = slot.pending.take()?;
        slot.in_flight = Some(push.clone());
        Some((key, push))
    }

    /// Record the outcome of the in-flight push for `key`. Returns the
    /// waiters registered for this attempt; the caller delivers the outcome.
    pub fn complete(
        &mut self,
        key: &FieldKey,
        outcome: &PushOutcome,
        now: Instant,
    ) -> Vec<oneshot::Sender<PushOutcome>> {
        let Some(slot) = self.slots.get_mut(key) else {
            return Vec::new();
        };
        let attempted = slot.in_flight.take();

        match outcome {
            PushOutcome::Retrying { .. } => {
                slot.attempts = slot.attempts.saturating_add(1);
                if slot.pending.is_none() {
                    slot.pending = attempted;
                }
                let delay = backoff_delay(self.retry_base, self.retry_max, slot.attempts);
                slot.not_before = Some(now + delay);
            }
            PushOutcome::Rejected { .. } => {
                slot.attempts = 0;
                slot.not_before = None;
                if let Some(attempted) = attempted {
                    self.rejected.insert(key.clone(), attempted);
                }
            }
            _ => {
                slot.attempts = 0;
                slot.not_before = None;
            }
        }

        if slot.pending.is_some() {
            self.order.push_back(key.clone());
        }

        let waiters = std::mem::take(&mut slot.waiters);
        if slot.is_idle() {
            self.slots.remove(key);
        }
        waiters
    }

    /// Register interest in the next completed attempt for `key`.
    ///
    /// Hands the sender back when the key has nothing queued or in flight.
    pub fn add_waiter(
        &mut self,
        key: &FieldKey,
        tx: oneshot::Sender<PushOutcome>,
    ) -> Result<(), oneshot::Sender<PushOutcome>> {
        match self.slots.get_mut(key) {
            Some(slot) if slot.pending.is_some() || slot.in_flight.is_some() => {
                slot.waiters.push(tx);
                Ok(())
            }
            _ => Err(tx),
        }
    }

    /// Withdraw the queued value for `key`. An in-flight push is untouched.
    /// Returns whether a queued value was removed.
    pub fn cancel(&mut self, key: &FieldKey) -> (bool, Vec<oneshot::Sender<PushOutcome>>) {
        let Some(slot) = self.slots.get_mut(key) else {
            return (false, Vec::new());
        };
        let removed = slot.pending.take().is_some();
        slot.not_before = None;
        slot.attempts = 0;
        self.order.retain(|k| k != key);

        let waiters = if slot.in_flight.is_none() {
            std::mem::take(&mut slot.waiters)
        } else {
            Vec::new()
        };
        if slot.is_idle() {
            self.slots.remove(key);
        }
        (removed, waiters)
    }

    /// Drain every registered waiter (used when going offline or shutting down).
    pub fn drain_waiters(&mut self) -> Vec<oneshot::Sender<PushOutcome>> {
        let mut all = Vec::new();
        for slot in self.slots.values_mut() {
            all.append(&mut slot.waiters);
        }
        self.slots.retain(|_, slot| !slot.is_idle());
        all
    }

    /// Make every queued key ready now.
    pub fn release_backoff(&mut self) {
        for slot in self.slots.values_mut() {
            slot.not_before = None;
        }
    }

    /// Earliest time a backed-off key becomes ready.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.order
            .iter()
            .filter_map(|key| self.slots.get(key).and_then(|s| s.not_before))
            .min()
    }

    /// Keys with a queued or in-flight value.
    pub fn active_keys(&self) -> Vec<FieldKey> {
        self.slots
            .iter()
            .filter(|(_, s)| s.pending.is_some() || s.in_flight.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn is_pending(&self, key: &FieldKey) -> bool {
        self.slots.get(key).map_or(false, |s| s.pending.is_some())
    }

    pub fn is_in_flight(&self, key: &FieldKey) -> bool {
        self.slots.get(key).map_or(false, |s| s.in_flight.is_some())
    }

    /// Number of queued (not in-flight) values.
    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|s| s.pending.is_some()).count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.slots.values().filter(|s| s.in_flight.is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
