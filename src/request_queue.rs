//! The pending-request queue: holds [`RequestRecord`]s, merges duplicates per user, and tracks
//! which users have a submission in flight.
//!
//! The queue is an ordered multiset keyed by (kind, user). Insertion order is preserved for
//! distinct merge keys; re-insertion of an existing key replaces the queued payload in place.
//! Records removed for submission come back (at the front, in their original order) if the
//! submission does not confirm them, so the queue stays authoritative until the server has the
//! data.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::requests::{AnalyticsEvent, RequestKind, RequestPayload, RequestRecord, UserId};
use crate::transport::UserBatch;

/// Which records a flush cycle may drain.
///
/// Ordered so that a deferred `All` flush is never downgraded by a later `UserFacing` one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum FlushScope {
    /// Only user-facing kinds. Used for the immediate flush triggered by an eligible enqueue.
    UserFacing,
    /// Everything. Used by the flush timer and explicit flush calls.
    All,
}

impl FlushScope {
    fn admits(self, kind: RequestKind) -> bool {
        match self {
            FlushScope::All => true,
            FlushScope::UserFacing => kind.is_user_facing(),
        }
    }
}

/// How a submission ended.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SubmissionDisposition {
    /// The server accepted the batch; its records are gone for good.
    Confirmed,
    /// Failed or cancelled; the records go back into the queue.
    Unconfirmed,
}

#[derive(Default)]
pub(crate) struct RequestQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    records: VecDeque<RequestRecord>,
    /// Users with a submission currently on the wire. At most one per user.
    in_flight: HashSet<UserId>,
    /// Users whose flush request arrived while they were in flight, with the widest scope that
    /// was asked for. A follow-up flush runs when their submission completes.
    deferred: HashMap<UserId, FlushScope>,
}

impl RequestQueue {
    pub(crate) fn new() -> RequestQueue {
        RequestQueue::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .expect("thread holding request queue lock should not panic")
    }

    /// Inserts `record`, or replaces the payload of the queued record with the same merge key.
    /// A merge keeps the record's original queue position.
    pub(crate) fn enqueue(&self, record: RequestRecord) {
        let mut inner = self.lock();
        let position = inner
            .records
            .iter()
            .position(|queued| queued.same_key(record.kind(), &record.user));
        match position {
            Some(index) => {
                log::debug!(target: "beacon", "merging {:?} request for user {}", record.kind(), record.user);
                inner.records[index] = record;
            }
            None => inner.records.push_back(record),
        }
    }

    /// Folds one analytics event into the queued `DataFlush` record for `user`, creating the
    /// record if there is none. Atomic with respect to concurrent enqueues of the same key.
    pub(crate) fn append_event(&self, user: UserId, event: AnalyticsEvent) {
        let mut inner = self.lock();
        let position = inner
            .records
            .iter()
            .position(|queued| queued.same_key(RequestKind::DataFlush, &user));
        match position {
            Some(index) => match &mut inner.records[index].payload {
                RequestPayload::DataFlush { events } => events.push(event),
                _ => unreachable!("DataFlush merge key always holds a DataFlush payload"),
            },
            None => inner.records.push_back(RequestRecord::new(
                user,
                RequestPayload::DataFlush {
                    events: vec![event],
                },
            )),
        }
    }

    /// Snapshots and removes every record eligible under `scope`, grouped per user in queue
    /// order, and marks those users in flight. Eligible records whose user is already in flight
    /// stay queued and the user is marked deferred instead; the flush request is never dropped.
    pub(crate) fn take_batches(&self, scope: FlushScope) -> Vec<UserBatch> {
        let mut inner = self.lock();
        let records = std::mem::take(&mut inner.records);
        let mut kept = VecDeque::with_capacity(records.len());
        let mut batches: Vec<UserBatch> = Vec::new();

        for record in records {
            if !scope.admits(record.kind()) {
                kept.push_back(record);
                continue;
            }
            if inner.in_flight.contains(&record.user) {
                let slot = inner.deferred.entry(record.user.clone()).or_insert(scope);
                *slot = (*slot).max(scope);
                kept.push_back(record);
                continue;
            }
            match batches.iter().position(|batch| batch.user == record.user) {
                Some(index) => batches[index].records.push(record),
                None => batches.push(UserBatch {
                    user: record.user.clone(),
                    records: vec![record],
                }),
            }
        }

        inner.records = kept;
        for batch in &batches {
            inner.in_flight.insert(batch.user.clone());
        }
        batches
    }

    /// Marks the batch's submission as finished. Unconfirmed records are restored to the front of
    /// the queue in their original relative order, except where a newer record with the same
    /// merge key arrived mid-flight (the newer payload stays authoritative).
    ///
    /// Returns the scope of a flush that was deferred while this submission was running, if any.
    pub(crate) fn complete(
        &self,
        batch: UserBatch,
        disposition: SubmissionDisposition,
    ) -> Option<FlushScope> {
        let mut inner = self.lock();
        inner.in_flight.remove(&batch.user);
        if let SubmissionDisposition::Unconfirmed = disposition {
            for record in batch.records.into_iter().rev() {
                let superseded = inner
                    .records
                    .iter()
                    .any(|queued| queued.same_key(record.kind(), &record.user));
                if !superseded {
                    inner.records.push_front(record);
                }
            }
        }
        inner.deferred.remove(&batch.user)
    }

    /// Rewrites ownership of `old`'s queued records to `new`. Used once, when the device's
    /// anonymous history is preserved for the first identified user. Later records win key
    /// collisions.
    pub(crate) fn reassign_user(&self, old: &UserId, new: &UserId) {
        let mut inner = self.lock();
        let records = std::mem::take(&mut inner.records);
        let mut rewritten: VecDeque<RequestRecord> = VecDeque::with_capacity(records.len());
        for mut record in records {
            if record.user == *old {
                record.user = new.clone();
            }
            match rewritten
                .iter()
                .position(|queued| queued.same_key(record.kind(), &record.user))
            {
                Some(index) => rewritten[index] = record,
                None => rewritten.push_back(record),
            }
        }
        inner.records = rewritten;
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub(crate) fn contains(&self, kind: RequestKind, user: &UserId) -> bool {
        self.lock()
            .records
            .iter()
            .any(|record| record.same_key(kind, user))
    }

    #[cfg(test)]
    pub(crate) fn snapshot_keys(&self) -> Vec<(RequestKind, UserId)> {
        self.lock()
            .records
            .iter()
            .map(|record| (record.kind(), record.user.clone()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }
}
