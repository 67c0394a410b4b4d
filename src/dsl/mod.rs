pub mod loader;

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

/// Static workflow definition.
/// Supplied already validated; the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub start_task_id: String,
    pub end_task_ids: BTreeSet<String>,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub sla: Option<SlaPolicy>,
}

impl Workflow {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn is_end_task(&self, task_id: &str) -> bool {
        self.end_task_ids.contains(task_id)
    }
}

/// A unit of work in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub join: JoinType,
    /// Expression over case variables; `false` skips the task.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub required_resources: Vec<ResourceRequirement>,
    #[serde(default)]
    pub produced_resources: Vec<ResourceRequirement>,
    #[serde(default)]
    pub sla: Option<TaskSla>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub failure_action: FailureAction,
}

impl Task {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            join: JoinType::default(),
            condition: None,
            required_resources: Vec::new(),
            produced_resources: Vec::new(),
            sla: None,
            max_retries: 0,
            failure_action: FailureAction::default(),
        }
    }
}

/// How many incoming dependencies must be satisfied before a task may start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    All,
    Any,
    /// At least this many incoming dependencies.
    N(usize),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FailureAction {
    Skip,
    #[default]
    Abort,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub from_task_id: String,
    pub to_task_id: String,
    #[serde(rename = "type", default)]
    pub kind: DependencyType,
    #[serde(default)]
    pub condition: Option<String>,
}

impl Dependency {
    pub fn new(from: &str, to: &str, kind: DependencyType) -> Self {
        Self {
            from_task_id: from.to_string(),
            to_task_id: to.to_string(),
            kind,
            condition: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DependencyType {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: String,
    pub capacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirement {
    pub resource_id: String,
    pub quantity: f64,
}

impl ResourceRequirement {
    pub fn new(resource_id: &str, quantity: f64) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Per-task deadline. Thresholds are fractions of the target duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSla {
    pub target_duration_secs: u64,
    pub warning_at: f64,
    pub critical_at: f64,
    #[serde(default)]
    pub breach_action: BreachAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BreachAction {
    #[default]
    Notify,
    Escalate,
}

/// Case-level deadline policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlaPolicy {
    pub default_duration_secs: u64,
    #[serde(default)]
    pub priority_durations_secs: BTreeMap<Priority, u64>,
    pub warning_at: f64,
    pub critical_at: f64,
}

impl SlaPolicy {
    pub fn duration_for(&self, priority: Priority) -> u64 {
        self.priority_durations_secs
            .get(&priority)
            .copied()
            .unwrap_or(self.default_duration_secs)
    }
}
