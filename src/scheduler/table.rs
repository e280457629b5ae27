use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::{CancelReason, Job, JobState};
use crate::retry::RetryPolicy;

/// Control block of a live provider execution
#[derive(Debug)]
pub(crate) struct Execution {
    pub cancel: CancellationToken,
    pub done_tx: watch::Sender<bool>,
}

impl Execution {
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            done_tx,
        }
    }

    /// Resolves once the supervisor has finalized the job
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }
}

#[derive(Debug)]
pub(crate) struct JobRecord {
    pub job: Job,
    pub policy: Option<RetryPolicy>,
    pub execution: Option<Execution>,
    /// Set when a cancel arrives while the job is running; the supervisor
    /// finalizes the state after the provider confirms teardown
    pub cancel_requested: Option<CancelReason>,
}

/// Stable handle to a record. Keys are never reused, so a key held by a
/// supervisor or retry timer either finds its own record or nothing.
pub(crate) type JobKey = u64;

/// Ready-queue entry: higher priority first, FIFO within a priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    seq: u64,
    key: JobKey,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Job records keyed in submission order, with an id index and a priority
/// ready queue.
///
/// Heap and pending entries are dropped lazily once their job moved on or
/// was pruned.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    records: BTreeMap<JobKey, JobRecord>,
    index: HashMap<Uuid, JobKey>,
    pending: VecDeque<JobKey>,
    ready: BinaryHeap<ReadyEntry>,
    next_key: JobKey,
    next_seq: u64,
}

impl JobTable {
    pub fn insert(&mut self, job: Job, policy: Option<RetryPolicy>) -> JobKey {
        let key = self.next_key;
        self.next_key += 1;

        self.index.insert(job.id, key);
        self.records.insert(
            key,
            JobRecord {
                job,
                policy,
                execution: None,
                cancel_requested: None,
            },
        );
        self.pending.push_back(key);
        key
    }

    pub fn key_of(&self, id: &Uuid) -> Option<JobKey> {
        self.index.get(id).copied()
    }

    pub fn get_mut(&mut self, key: JobKey) -> Option<&mut JobRecord> {
        self.records.get_mut(&key)
    }

    pub fn by_id(&self, id: &Uuid) -> Option<&JobRecord> {
        self.key_of(id).and_then(|key| self.records.get(&key))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut JobRecord> {
        self.records.values_mut()
    }

    pub fn count_in(&self, state: JobState) -> usize {
        self.records().filter(|r| r.job.state == state).count()
    }

    /// Move a job to `queued` and put it on the ready queue
    pub fn enqueue(&mut self, key: JobKey) -> bool {
        let Some(record) = self.records.get_mut(&key) else {
            return false;
        };
        if !record.job.transition(JobState::Queued) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push(ReadyEntry {
            priority: record.job.priority,
            seq,
            key,
        });
        true
    }

    /// Admit every `pending` job to the ready queue, oldest first
    pub fn admit_pending(&mut self) -> usize {
        let mut admitted = 0;
        for key in std::mem::take(&mut self.pending) {
            let pending = self
                .records
                .get(&key)
                .is_some_and(|r| r.job.state == JobState::Pending);
            if pending && self.enqueue(key) {
                admitted += 1;
            }
        }
        admitted
    }

    /// Pop the best queued job that `eligible` accepts.
    ///
    /// Rejected entries are put back so they keep their place in line.
    pub fn pop_ready(&mut self, mut eligible: impl FnMut(&JobRecord) -> bool) -> Option<JobKey> {
        let mut deferred = Vec::new();
        let mut found = None;

        while let Some(entry) = self.ready.pop() {
            let Some(record) = self.records.get(&entry.key) else {
                continue;
            };
            if record.job.state != JobState::Queued {
                continue;
            }
            if eligible(record) {
                found = Some(entry.key);
                break;
            }
            deferred.push(entry);
        }

        self.ready.extend(deferred);
        found
    }

    /// Drop terminal jobs last updated before `cutoff`. Returns how many went.
    pub fn prune_terminal(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<JobKey> = self
            .records
            .iter()
            .filter(|(_, r)| {
                r.job.state.is_terminal() && r.execution.is_none() && r.job.updated_at < cutoff
            })
            .map(|(&key, _)| key)
            .collect();

        for key in &expired {
            if let Some(record) = self.records.remove(key) {
                self.index.remove(&record.job.id);
            }
        }
        expired.len()
    }
}
