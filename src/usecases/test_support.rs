//! Failure-injecting store wrapper and fixtures shared by use-case tests.

use crate::adapters::persistence::MemoryStore;
use crate::domain::{EntityKind, StoreError};
use crate::ports::{EntityStore, ListFilter};
use crate::shared::RetryPolicy;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    attempts: u32,
    writes: u32,
}

/// Remaining injected failures for one record. `None` = fail forever.
type FailureBudget = Option<u32>;

type Key = (EntityKind, String);

/// Read-failure key standing for `list` over a whole collection.
const LIST_KEY: &str = "*";

/// Wraps `MemoryStore`, counting successful updates per record and failing
/// chosen reads and updates with `StoreError::Unavailable`. Updates can also
/// be slowed down to trip the per-call timeout.
pub struct FlakyStore {
    inner: MemoryStore,
    counts: Mutex<HashMap<Key, Counts>>,
    failing: Mutex<HashMap<Key, FailureBudget>>,
    failing_reads: Mutex<HashMap<Key, FailureBudget>>,
    read_attempts: Mutex<HashMap<Key, u32>>,
    delays: Mutex<HashMap<Key, Duration>>,
    other_writes: Mutex<u32>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            counts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashMap::new()),
            read_attempts: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            other_writes: Mutex::new(0),
        }
    }

    /// Direct access that bypasses counting and failure injection.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_updates(&self, kind: EntityKind, id: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert((kind, id.to_string()), None);
    }

    pub fn fail_updates_times(&self, kind: EntityKind, id: &str, times: u32) {
        self.failing
            .lock()
            .unwrap()
            .insert((kind, id.to_string()), Some(times));
    }

    pub fn heal(&self, kind: EntityKind, id: &str) {
        self.failing.lock().unwrap().remove(&(kind, id.to_string()));
    }

    /// Fails the next `times` gets of one record.
    pub fn fail_gets_times(&self, kind: EntityKind, id: &str, times: u32) {
        self.failing_reads
            .lock()
            .unwrap()
            .insert((kind, id.to_string()), Some(times));
    }

    /// Fails every `list` of `kind`.
    pub fn fail_lists(&self, kind: EntityKind) {
        self.failing_reads
            .lock()
            .unwrap()
            .insert((kind, LIST_KEY.to_string()), None);
    }

    pub fn get_attempts(&self, kind: EntityKind, id: &str) -> u32 {
        self.read_attempts
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Every update of the record sleeps `delay` before reaching the store.
    pub fn slow_updates(&self, kind: EntityKind, id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert((kind, id.to_string()), delay);
    }

    pub fn reset_counts(&self) {
        self.counts.lock().unwrap().clear();
        *self.other_writes.lock().unwrap() = 0;
    }

    pub fn writes_to(&self, kind: EntityKind, id: &str) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .map(|c| c.writes)
            .unwrap_or(0)
    }

    pub fn update_attempts(&self, kind: EntityKind, id: &str) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .map(|c| c.attempts)
            .unwrap_or(0)
    }

    /// Successful updates across every record of `kind`.
    pub fn counter_writes(&self, kind: EntityKind) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, c)| c.writes)
            .sum()
    }

    /// Successful updates, creates and deletes.
    pub fn total_writes(&self) -> u32 {
        let updates: u32 = self.counts.lock().unwrap().values().map(|c| c.writes).sum();
        updates + *self.other_writes.lock().unwrap()
    }

    fn should_fail(&self, kind: EntityKind, id: &str) -> bool {
        take_failure(&self.failing, (kind, id.to_string()))
    }
}

fn take_failure(budgets: &Mutex<HashMap<Key, FailureBudget>>, key: Key) -> bool {
    let mut budgets = budgets.lock().unwrap();
    match budgets.get_mut(&key) {
        None => false,
        Some(None) => true,
        Some(Some(0)) => {
            budgets.remove(&key);
            false
        }
        Some(Some(n)) => {
            *n -= 1;
            true
        }
    }
}

#[async_trait::async_trait]
impl EntityStore for FlakyStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, StoreError> {
        *self
            .read_attempts
            .lock()
            .unwrap()
            .entry((kind, id.to_string()))
            .or_default() += 1;
        if take_failure(&self.failing_reads, (kind, id.to_string())) {
            return Err(StoreError::Unavailable(format!("{} {} is down", kind, id)));
        }
        self.inner.get(kind, id).await
    }

    async fn list(
        &self,
        kind: EntityKind,
        filter: Option<&ListFilter>,
    ) -> Result<Vec<Value>, StoreError> {
        if take_failure(&self.failing_reads, (kind, LIST_KEY.to_string())) {
            return Err(StoreError::Unavailable(format!("{} listing is down", kind)));
        }
        self.inner.list(kind, filter).await
    }

    async fn create(&self, kind: EntityKind, body: Value) -> Result<Value, StoreError> {
        let created = self.inner.create(kind, body).await?;
        *self.other_writes.lock().unwrap() += 1;
        Ok(created)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        partial: Value,
    ) -> Result<Value, StoreError> {
        self.counts
            .lock()
            .unwrap()
            .entry((kind, id.to_string()))
            .or_default()
            .attempts += 1;
        let delay = self.delays.lock().unwrap().get(&(kind, id.to_string())).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail(kind, id) {
            return Err(StoreError::Unavailable(format!("{} {} is down", kind, id)));
        }
        let updated = self.inner.update(kind, id, partial).await?;
        self.counts
            .lock()
            .unwrap()
            .entry((kind, id.to_string()))
            .or_default()
            .writes += 1;
        Ok(updated)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        self.inner.delete(kind, id).await?;
        *self.other_writes.lock().unwrap() += 1;
        Ok(())
    }
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        call_timeout: Duration::from_secs(2),
    }
}

/// A consistent little faculty:
///
/// - D1 (Computing) owns majors M1, M2; no staff yet
/// - M1 lists S1, S2 (both year 1, pointing back); M2 is empty
/// - S3 (year 2) and S4 (year 2) have no major
/// - professors P1, P2 teach nothing; P1 has a login account
/// - students ST1 (M1, year 1), ST2 (M2, year 1)
/// - one active January exam period
pub async fn seeded_store() -> FlakyStore {
    let store = MemoryStore::new();
    let seed = [
        (
            EntityKind::Department,
            json!({"id": "D1", "name": "Computing", "major_ids": ["M1", "M2"], "staff": []}),
        ),
        (
            EntityKind::Major,
            json!({"id": "M1", "name": "Software Engineering", "department_id": "D1", "subject_ids": ["S1", "S2"]}),
        ),
        (
            EntityKind::Major,
            json!({"id": "M2", "name": "Information Systems", "department_id": "D1", "subject_ids": []}),
        ),
        (
            EntityKind::Subject,
            json!({"id": "S1", "name": "Programming 1", "major_id": "M1", "year": 1, "semester": 1, "espb": 8, "professor_ids": []}),
        ),
        (
            EntityKind::Subject,
            json!({"id": "S2", "name": "Mathematics 1", "major_id": "M1", "year": 1, "semester": 1, "espb": 7, "professor_ids": []}),
        ),
        (
            EntityKind::Subject,
            json!({"id": "S3", "name": "Algorithms", "major_id": null, "year": 2, "semester": 1, "espb": 6, "professor_ids": []}),
        ),
        (
            EntityKind::Subject,
            json!({"id": "S4", "name": "Databases", "major_id": null, "year": 2, "semester": 2, "espb": 6, "professor_ids": []}),
        ),
        (
            EntityKind::Professor,
            json!({"id": "P1", "first_name": "Milan", "last_name": "Jovanovic", "department_ids": [], "subject_ids": []}),
        ),
        (
            EntityKind::Professor,
            json!({"id": "P2", "first_name": "Jelena", "last_name": "Markovic", "department_ids": [], "subject_ids": []}),
        ),
        (
            EntityKind::User,
            json!({"id": "P1", "email": "milan@uni.example", "role": "professor"}),
        ),
        (
            EntityKind::User,
            json!({"id": "ADM", "email": "office@uni.example", "role": "admin"}),
        ),
        (
            EntityKind::Student,
            json!({"id": "ST1", "first_name": "Ana", "last_name": "Petrovic", "major_id": "M1", "year": 1, "gpa": 0.0, "espb": 0, "scholarship": false}),
        ),
        (
            EntityKind::Student,
            json!({"id": "ST2", "first_name": "Luka", "last_name": "Ilic", "major_id": "M2", "year": 1, "gpa": 0.0, "espb": 0, "scholarship": false}),
        ),
        (
            EntityKind::ExamPeriod,
            json!({"id": "JAN", "name": "January", "start_date": "2025-01-10", "end_date": "2025-01-24", "academic_year": "2024/2025", "semester": 1, "is_active": true}),
        ),
    ];
    for (kind, doc) in seed {
        store.insert(kind, doc).await.expect("seed document");
    }
    FlakyStore::new(store)
}
