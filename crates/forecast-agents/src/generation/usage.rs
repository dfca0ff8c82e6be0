//! Bounded log of text-generation attempts.
//!
//! One `UsageLog` is created per process (or per test) and cloned into every
//! component that makes calls; clones share the same buffer. Once the log
//! holds `capacity` entries the oldest entry is evicted for each new one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskTag;

/// One attempt against the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub task: TaskTag,
    pub model: String,
    /// 0 for the first attempt of a call.
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub prompt_chars: usize,
    pub response_chars: usize,
    /// Error text when the attempt failed.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate view of the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub calls: usize,
    pub failures: usize,
    pub per_task: BTreeMap<TaskTag, usize>,
    pub per_model: BTreeMap<String, usize>,
    pub total_elapsed_ms: u64,
}

impl UsageSummary {
    fn add(&mut self, r: &UsageRecord) {
        self.calls += 1;
        if !r.succeeded() {
            self.failures += 1;
        }
        *self.per_task.entry(r.task).or_default() += 1;
        *self.per_model.entry(r.model.clone()).or_default() += 1;
        self.total_elapsed_ms += r.elapsed_ms;
    }
}

/// Position in the log, taken with [`UsageLog::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UsageMark(u64);

#[derive(Debug)]
struct Entries {
    records: VecDeque<UsageRecord>,
    /// Records ever appended, evicted ones included.
    total: u64,
}

#[derive(Debug, Clone)]
pub struct UsageLog {
    inner: Arc<Mutex<Entries>>,
    capacity: usize,
}

impl Default for UsageLog {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

impl UsageLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Entries {
                records: VecDeque::with_capacity(capacity.min(1024)),
                total: 0,
            })),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, record: UsageRecord) {
        let mut log = self.lock();
        while log.records.len() >= self.capacity {
            log.records.pop_front();
        }
        log.records.push_back(record);
        log.total += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Copy of every retained record, oldest first.
    pub fn snapshot(&self) -> Vec<UsageRecord> {
        self.lock().records.iter().cloned().collect()
    }

    /// Current end of the log.
    pub fn mark(&self) -> UsageMark {
        UsageMark(self.lock().total)
    }

    /// Every retained record.
    pub fn summary(&self) -> UsageSummary {
        let log = self.lock();
        let mut summary = UsageSummary::default();
        log.records.iter().for_each(|r| summary.add(r));
        summary
    }

    /// Records appended after `mark`, as far as they are still retained.
    ///
    /// Clones share one log, so calls from runs overlapping in time are
    /// counted too.
    pub fn summary_since(&self, mark: UsageMark) -> UsageSummary {
        let log = self.lock();
        let added = log.total.saturating_sub(mark.0);
        let kept = (added as usize).min(log.records.len());
        let mut summary = UsageSummary::default();
        log.records
            .iter()
            .skip(log.records.len() - kept)
            .for_each(|r| summary.add(r));
        summary
    }
}
