use std::collections::BTreeMap;
use std::time::Duration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Serialize, Deserialize};
use crate::runtime::case::CaseStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Attempts started.
    pub execution_count: u64,
    pub success_count: u64,
    /// Terminal failures, after retries are exhausted.
    pub failure_count: u64,
    pub retry_count: u64,
}

/// Snapshot produced by `Engine::get_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub generated_at: DateTime<Utc>,
    pub total_cases: usize,
    pub cases_by_status: BTreeMap<CaseStatus, usize>,
    pub average_case_duration: Option<Duration>,
    pub task_metrics: BTreeMap<String, TaskMetrics>,
    pub resource_utilization: BTreeMap<String, f64>,
}

impl Metrics {
    pub fn case_count(&self, status: CaseStatus) -> usize {
        self.cases_by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn task(&self, task_id: &str) -> TaskMetrics {
        self.task_metrics.get(task_id).copied().unwrap_or_default()
    }
}

/// Live per-task counters.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    tasks: DashMap<String, TaskMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&self, task_id: &str) {
        self.tasks.entry(task_id.to_string()).or_default().execution_count += 1;
    }

    pub fn record_success(&self, task_id: &str) {
        self.tasks.entry(task_id.to_string()).or_default().success_count += 1;
    }

    pub fn record_failure(&self, task_id: &str) {
        self.tasks.entry(task_id.to_string()).or_default().failure_count += 1;
    }

    pub fn record_retry(&self, task_id: &str) {
        self.tasks.entry(task_id.to_string()).or_default().retry_count += 1;
    }

    pub fn task_snapshot(&self) -> BTreeMap<String, TaskMetrics> {
        self.tasks.iter().map(|r| (r.key().clone(), *r.value())).collect()
    }
}

/// Mean of the given durations, `None` when empty.
pub fn average(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    let total: Duration = durations.iter().sum();
    Some(total / durations.len() as u32)
}
