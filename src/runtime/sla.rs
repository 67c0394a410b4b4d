//! Deadline tracking and alert values.
//!
//! Checks are pull-based: nothing here runs on its own clock. The engine
//! evaluates every running case and task against its deadline whenever
//! `Engine::check_slas` is called.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AlertType {
    TaskFailed,
    SlaWarning,
    SlaBreach,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub case_id: String,
    pub task_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        case_id: &str,
        task_id: Option<&str>,
        message: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            case_id: case_id.to_string(),
            task_id: task_id.map(str::to_string),
            message,
            created_at,
        }
    }
}

/// Whether crossed thresholds are reported on every check or only once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AlertMode {
    /// Every check re-emits all crossed thresholds; callers deduplicate.
    #[default]
    Level,
    /// Each severity is emitted once per case or task.
    Edge,
}

/// Fraction of the allowed window consumed at `now`.
pub fn elapsed_ratio(start: DateTime<Utc>, deadline: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let window = (deadline - start).num_milliseconds();
    let spent = (now - start).num_milliseconds();
    if window <= 0 {
        return if spent >= 0 { f64::INFINITY } else { 0.0 };
    }
    spent as f64 / window as f64
}

/// Severities crossed at `ratio`, in ascending order.
pub fn crossed(ratio: f64, warning_at: f64, critical_at: f64) -> Vec<Severity> {
    let mut levels = Vec::with_capacity(2);
    if ratio >= warning_at {
        levels.push(Severity::Warning);
    }
    if ratio >= critical_at {
        levels.push(Severity::Critical);
    }
    levels
}

/// Applies the alert mode to the crossed levels, updating the remembered level.
pub(crate) fn to_emit(mode: AlertMode, crossed: Vec<Severity>, last: &mut Option<Severity>) -> Vec<Severity> {
    let highest = crossed.last().copied();
    let emit = match mode {
        AlertMode::Level => crossed,
        AlertMode::Edge => crossed
            .into_iter()
            .filter(|level| last.is_none_or(|seen| *level > seen))
            .collect(),
    };
    if highest > *last {
        *last = highest;
    }
    emit
}

pub(crate) fn alert_type_for(severity: Severity) -> AlertType {
    match severity {
        Severity::Warning => AlertType::SlaWarning,
        Severity::Critical => AlertType::SlaBreach,
    }
}
