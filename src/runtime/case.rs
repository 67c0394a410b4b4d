use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use uuid::Uuid;
use crate::dsl::{Priority, Workflow};
use crate::runtime::sla::Severity;

pub type Variables = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CaseStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl CaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Ready,
    Assigned,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
    Escalated,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled | Self::Escalated
        )
    }

    /// Statuses tracked in `Case::current_tasks`.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Ready | Self::Assigned | Self::Running)
    }
}

/// Per-case execution record of one static task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInstance {
    pub id: Uuid,
    pub task_id: String,
    pub case_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub assigned_to: Option<String>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub output: Variables,
    pub wait_duration: Option<Duration>,
    pub work_duration: Option<Duration>,
    pub total_duration: Option<Duration>,
    /// Whether the instance currently holds its required resources.
    pub holds_resources: bool,
    #[serde(skip)]
    pub(crate) sla_level: Option<Severity>,
}

impl TaskInstance {
    pub fn new(task_id: &str, case_id: &str, created_at: DateTime<Utc>, deadline: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            case_id: case_id.to_string(),
            status: TaskStatus::Pending,
            created_at,
            ready_at: None,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            deadline,
            assigned_to: None,
            retry_count: 0,
            error: None,
            output: Variables::new(),
            wait_duration: None,
            work_duration: None,
            total_duration: None,
            holds_resources: false,
            sla_level: None,
        }
    }
}

/// One running instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Case {
    pub id: String,
    pub workflow_id: String,
    pub priority: Priority,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    /// Task ids in Ready, Assigned or Running.
    pub current_tasks: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub task_instances: BTreeMap<String, TaskInstance>,
    pub input: Variables,
    pub output: Variables,
    pub variables: Variables,
    pub error: Option<String>,
    #[serde(skip)]
    pub(crate) sla_level: Option<Severity>,
}

impl Case {
    /// Creates the case and one pending instance per static task.
    pub fn new(
        id: &str,
        workflow: &Workflow,
        priority: Priority,
        input: Variables,
        now: DateTime<Utc>,
    ) -> Self {
        let deadline = workflow
            .sla
            .as_ref()
            .and_then(|policy| deadline_after(now, policy.duration_for(priority)));

        let task_instances = workflow
            .tasks
            .iter()
            .map(|task| {
                let task_deadline = task
                    .sla
                    .as_ref()
                    .and_then(|sla| deadline_after(now, sla.target_duration_secs));
                (task.id.clone(), TaskInstance::new(&task.id, id, now, task_deadline))
            })
            .collect();

        Self {
            id: id.to_string(),
            workflow_id: workflow.id.clone(),
            priority,
            status: CaseStatus::Running,
            created_at: now,
            started_at: now,
            completed_at: None,
            deadline,
            current_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            task_instances,
            variables: input.clone(),
            input,
            output: Variables::new(),
            error: None,
            sla_level: None,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskInstance> {
        self.task_instances.get(task_id)
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.task_instances.get(task_id).map(|t| t.status)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.completed_at.and_then(|end| (end - self.started_at).to_std().ok())
    }

    pub(crate) fn mark_current(&mut self, task_id: &str) {
        if !self.current_tasks.iter().any(|t| t == task_id) {
            self.current_tasks.push(task_id.to_string());
        }
    }

    pub(crate) fn mark_finished(&mut self, task_id: &str) {
        self.current_tasks.retain(|t| t != task_id);
        if !self.completed_tasks.iter().any(|t| t == task_id) {
            self.completed_tasks.push(task_id.to_string());
        }
    }

    pub(crate) fn drop_current(&mut self, task_id: &str) {
        self.current_tasks.retain(|t| t != task_id);
    }
}

/// Selection criteria for `Engine::get_cases`; unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseFilter {
    pub status: Option<CaseStatus>,
    pub priority: Option<Priority>,
    pub workflow_id: Option<String>,
}

impl CaseFilter {
    pub fn with_status(status: CaseStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, case: &Case) -> bool {
        self.status.is_none_or(|s| s == case.status)
            && self.priority.is_none_or(|p| p == case.priority)
            && self.workflow_id.as_ref().is_none_or(|w| *w == case.workflow_id)
    }
}

fn deadline_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
}

pub(crate) fn elapsed(from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> Option<Duration> {
    from.and_then(|start| (to - start).to_std().ok())
}
