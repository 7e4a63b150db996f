//! Rotation state machine deciding standard vs evaluation mode
//!
//! Each task type owns a [`TaskCounter`]. Traffic advances the counter:
//! after `standard_cycle_length` standard-mode tasks the counter flips into
//! evaluation mode, where the triggering task and the next
//! `evaluation_cycle_length` tasks fan out to every candidate. Then it flips
//! back. Rotation only advances on routed calls, so a task type without
//! traffic never enters evaluation mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::MetricsStore;
use super::types::TaskType;

/// Current routing mode of a task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    #[default]
    Standard,
    Evaluation,
}

impl std::fmt::Display for RotationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Evaluation => write!(f, "evaluation"),
        }
    }
}

impl std::str::FromStr for RotationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "evaluation" => Ok(Self::Evaluation),
            _ => Err(format!("Unknown rotation mode: {}", s)),
        }
    }
}

/// Per-task-type rotation state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCounter {
    pub count: u32,
    pub last_evaluation_at: Option<DateTime<Utc>>,
    pub mode: RotationMode,
    pub evaluation_tasks_remaining: u32,
}

impl TaskCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_evaluation_mode(&self) -> bool {
        self.mode == RotationMode::Evaluation
    }

    /// Advance the counter by one routed task
    ///
    /// Returns whether this task runs in evaluation mode.
    pub fn advance(&mut self, standard_cycle_length: u32, evaluation_cycle_length: u32) -> bool {
        self.count = self.count.saturating_add(1);

        match self.mode {
            RotationMode::Standard if self.count >= standard_cycle_length => {
                self.mode = RotationMode::Evaluation;
                self.evaluation_tasks_remaining = evaluation_cycle_length;
                self.count = 0;
                self.last_evaluation_at = Some(Utc::now());
                true
            }
            RotationMode::Standard => false,
            RotationMode::Evaluation => {
                self.evaluation_tasks_remaining = self.evaluation_tasks_remaining.saturating_sub(1);
                if self.evaluation_tasks_remaining == 0 {
                    self.mode = RotationMode::Standard;
                    self.count = 0;
                }
                true
            }
        }
    }
}

/// Rotation counters for every task type seen so far
///
/// Every task type has its own lock, so concurrent callers on one task type
/// serialize their increments while other task types proceed independently.
#[derive(Debug, Default)]
pub struct RotationTracker {
    counters: Mutex<HashMap<TaskType, Arc<Mutex<TaskCounter>>>>,
}

impl RotationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker seeded with previously persisted counters
    pub fn from_counters(counters: HashMap<TaskType, TaskCounter>) -> Self {
        let counters = counters
            .into_iter()
            .map(|(task, counter)| (task, Arc::new(Mutex::new(counter))))
            .collect();
        Self {
            counters: Mutex::new(counters),
        }
    }

    async fn entry(&self, task_type: &TaskType) -> Arc<Mutex<TaskCounter>> {
        let mut counters = self.counters.lock().await;
        Arc::clone(counters.entry(task_type.clone()).or_default())
    }

    /// Advance the counter for a task type and persist the new state
    ///
    /// The save completes before the per-task lock is released, so stored
    /// counters follow the same order as the in-memory transitions. A save
    /// failure is logged and does not change the decision. Returns the
    /// decision plus a snapshot of the counter after the transition.
    pub async fn advance(
        &self,
        task_type: &TaskType,
        standard_cycle_length: u32,
        evaluation_cycle_length: u32,
        store: &dyn MetricsStore,
    ) -> (bool, TaskCounter) {
        let entry = self.entry(task_type).await;
        let mut counter = entry.lock().await;
        let before = counter.mode;
        let evaluate = counter.advance(standard_cycle_length, evaluation_cycle_length);

        if counter.mode != before {
            debug!(
                task_type = %task_type,
                from = %before,
                to = %counter.mode,
                remaining = counter.evaluation_tasks_remaining,
                "Rotation mode changed"
            );
        }

        if let Err(e) = store.save_task_counter(task_type, &counter).await {
            warn!(task_type = %task_type, error = %e, "Failed to persist rotation counter");
        }

        (evaluate, counter.clone())
    }

    /// Snapshot of a task type's counter (fresh counter if never seen)
    pub async fn snapshot(&self, task_type: &TaskType) -> TaskCounter {
        let entry = {
            let counters = self.counters.lock().await;
            counters.get(task_type).cloned()
        };
        match entry {
            Some(counter) => counter.lock().await.clone(),
            None => TaskCounter::new(),
        }
    }

    /// Task types that have a counter
    pub async fn task_types(&self) -> Vec<TaskType> {
        let counters = self.counters.lock().await;
        let mut types: Vec<TaskType> = counters.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::routing::config::RegistryConfig;
    use crate::routing::store::InMemoryMetricsStore;
    use crate::routing::types::{ComparisonReport, EvaluationRecord, ModelIdentifier};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_fourteen_call_cycle() {
        let mut counter = TaskCounter::new();
        let mut decisions = Vec::new();
        for _ in 0..14 {
            decisions.push(counter.advance(10, 3));
        }

        for (i, decision) in decisions.iter().enumerate().take(9) {
            assert!(!decision, "call {} should be standard", i + 1);
        }
        assert!(decisions[9], "call 10 triggers evaluation");
        assert!(decisions[10]);
        assert!(decisions[11]);
        assert!(decisions[12], "call 13 is the last evaluation task");
        assert!(!decisions[13], "call 14 starts a fresh cycle");

        assert_eq!(counter.mode, RotationMode::Standard);
        assert_eq!(counter.count, 1);
        assert!(counter.last_evaluation_at.is_some());
    }

    #[test]
    fn test_transition_points() {
        let mut counter = TaskCounter::new();
        for _ in 0..9 {
            counter.advance(10, 3);
        }
        assert_eq!(counter.count, 9);
        assert_eq!(counter.mode, RotationMode::Standard);

        assert!(counter.advance(10, 3));
        assert_eq!(counter.mode, RotationMode::Evaluation);
        assert_eq!(counter.count, 0);
        assert_eq!(counter.evaluation_tasks_remaining, 3);

        counter.advance(10, 3);
        counter.advance(10, 3);
        assert_eq!(counter.evaluation_tasks_remaining, 1);
        assert!(counter.in_evaluation_mode());

        assert!(counter.advance(10, 3));
        assert_eq!(counter.mode, RotationMode::Standard);
        assert_eq!(counter.count, 0);
        assert_eq!(counter.evaluation_tasks_remaining, 0);
    }

    #[test]
    fn test_cycle_length_one() {
        let mut counter = TaskCounter::new();
        // Every standard call triggers, then one evaluation call follows
        assert!(counter.advance(1, 1));
        assert!(counter.advance(1, 1));
        assert_eq!(counter.mode, RotationMode::Standard);
        assert!(counter.advance(1, 1));
    }

    #[tokio::test]
    async fn test_tracker_keeps_task_types_independent() {
        let store = InMemoryMetricsStore::new();
        let tracker = RotationTracker::new();
        let text = TaskType::text_generation();
        let embed = TaskType::embedding();

        for _ in 0..2 {
            tracker.advance(&text, 3, 1, &store).await;
        }
        let (evaluate, _) = tracker.advance(&embed, 3, 1, &store).await;
        assert!(!evaluate);

        let (evaluate, snapshot) = tracker.advance(&text, 3, 1, &store).await;
        assert!(evaluate);
        assert_eq!(snapshot.mode, RotationMode::Evaluation);

        assert_eq!(tracker.snapshot(&embed).await.count, 1);
        assert_eq!(tracker.task_types().await, vec![embed, text]);
    }

    #[tokio::test]
    async fn test_concurrent_callers_trigger_exactly_once() {
        let store = Arc::new(InMemoryMetricsStore::new());
        let tracker = Arc::new(RotationTracker::new());
        let task = TaskType::text_generation();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let store = Arc::clone(&store);
                let task = task.clone();
                tokio::spawn(async move { tracker.advance(&task, 10, 3, store.as_ref()).await.0 })
            })
            .collect();

        let mut triggered = 0;
        for handle in handles {
            if handle.await.unwrap() {
                triggered += 1;
            }
        }

        assert_eq!(triggered, 1);
        let snapshot = tracker.snapshot(&task).await;
        assert_eq!(snapshot.mode, RotationMode::Evaluation);
        assert_eq!(snapshot.evaluation_tasks_remaining, 3);
    }

    #[tokio::test]
    async fn test_tracker_restores_counters() {
        let task = TaskType::embedding();
        let mut seeded = HashMap::new();
        seeded.insert(
            task.clone(),
            TaskCounter {
                count: 9,
                ..Default::default()
            },
        );

        let tracker = RotationTracker::from_counters(seeded);
        let (evaluate, _) = tracker.advance(&task, 10, 3, &InMemoryMetricsStore::new()).await;
        assert!(evaluate);
    }

    /// Counter store whose first save stalls, so a second caller would
    /// overtake it if saves ran outside the per-task lock
    struct SlowFirstSave {
        inner: InMemoryMetricsStore,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl MetricsStore for SlowFirstSave {
        async fn query(
            &self,
            model_id: Option<&ModelIdentifier>,
            task_type: &TaskType,
        ) -> Result<Vec<EvaluationRecord>> {
            self.inner.query(model_id, task_type).await
        }

        async fn append_record(&self, record: &EvaluationRecord) -> Result<()> {
            self.inner.append_record(record).await
        }

        async fn append_report(&self, report: &ComparisonReport) -> Result<()> {
            self.inner.append_report(report).await
        }

        async fn reports(&self, task_type: &TaskType, limit: usize) -> Result<Vec<ComparisonReport>> {
            self.inner.reports(task_type, limit).await
        }

        async fn get_config(&self) -> Result<Option<RegistryConfig>> {
            self.inner.get_config().await
        }

        async fn put_config(&self, config: &RegistryConfig) -> Result<()> {
            self.inner.put_config(config).await
        }

        async fn load_task_counters(&self) -> Result<HashMap<TaskType, TaskCounter>> {
            self.inner.load_task_counters().await
        }

        async fn save_task_counter(&self, task_type: &TaskType, counter: &TaskCounter) -> Result<()> {
            if self.saves.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.save_task_counter(task_type, counter).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_counter_keeps_evaluation_flip() {
        let store = Arc::new(SlowFirstSave {
            inner: InMemoryMetricsStore::new(),
            saves: AtomicUsize::new(0),
        });
        let tracker = Arc::new(RotationTracker::new());
        let task = TaskType::text_generation();

        let first = {
            let (tracker, store, task) = (Arc::clone(&tracker), Arc::clone(&store), task.clone());
            tokio::spawn(async move { tracker.advance(&task, 2, 1, store.as_ref()).await.0 })
        };
        tokio::task::yield_now().await;
        let second = {
            let (tracker, store, task) = (Arc::clone(&tracker), Arc::clone(&store), task.clone());
            tokio::spawn(async move { tracker.advance(&task, 2, 1, store.as_ref()).await.0 })
        };

        assert!(!first.await.unwrap());
        assert!(second.await.unwrap());

        let live = tracker.snapshot(&task).await;
        let persisted = store.load_task_counters().await.unwrap();
        let stored = &persisted[&task];
        assert_eq!(stored.mode, RotationMode::Evaluation);
        assert_eq!(stored.evaluation_tasks_remaining, live.evaluation_tasks_remaining);

        let restored = RotationTracker::from_counters(persisted);
        assert_eq!(restored.snapshot(&task).await.mode, RotationMode::Evaluation);
    }
}
