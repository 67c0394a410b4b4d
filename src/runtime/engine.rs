use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};
use crate::dsl::{BreachAction, FailureAction, Priority, Task, TaskSla, Workflow};
use crate::error::{EngineError, EngineResult};
use crate::runtime::case::{elapsed, Case, CaseFilter, CaseStatus, TaskInstance, TaskStatus, Variables};
use crate::runtime::clock::{Clock, SystemClock};
use crate::runtime::hooks::{Condition, ExecutionContext, TaskHook};
use crate::runtime::metrics::{self, Metrics, MetricsRecorder};
use crate::runtime::observer::{Event, Observers};
use crate::runtime::readiness::{ConditionSet, DependencyGraph, Readiness};
use crate::runtime::resource::{PoolSnapshot, ResourceManager};
use crate::runtime::sla::{self, Alert, AlertMode, AlertType, Severity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub alert_mode: AlertMode,
    /// Fire `on_task_ready` again when a failed task goes back to Ready.
    pub notify_on_retry: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alert_mode: AlertMode::Level,
            notify_on_retry: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum HookStage {
    Start,
    Complete,
    Fail,
}

/// Executes cases of one workflow against one set of resource pools.
///
/// Every operation returns immediately. Operations on the same case are
/// serialised by that case's lock; pools carry their own locks.
pub struct Engine {
    workflow: Arc<Workflow>,
    task_index: HashMap<String, usize>,
    graph: DependencyGraph,
    conditions: ConditionSet,
    hooks: HashMap<String, Arc<dyn TaskHook>>,
    resources: ResourceManager,

    cases: DashMap<String, Arc<Mutex<Case>>>,

    metrics: MetricsRecorder,
    observers: Observers,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(workflow: Workflow) -> EngineResult<Self> {
        Self::with_options(workflow, EngineConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_options(workflow: Workflow, config: EngineConfig, clock: Arc<dyn Clock>) -> EngineResult<Self> {
        let graph = DependencyGraph::new(&workflow)?;
        if workflow.task(&workflow.start_task_id).is_none() {
            return Err(EngineError::PolicyViolation(format!(
                "start task {} is not declared",
                workflow.start_task_id
            )));
        }
        let conditions = ConditionSet::from_workflow(&workflow)?;
        let resources = ResourceManager::new(&workflow.resources)?;
        let task_index = workflow
            .tasks
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.id.clone(), idx))
            .collect();

        info!(workflow_id = %workflow.id, tasks = workflow.tasks.len(), resources = workflow.resources.len(), "Engine created");

        Ok(Self {
            workflow: Arc::new(workflow),
            task_index,
            graph,
            conditions,
            hooks: HashMap::new(),
            resources,
            cases: DashMap::new(),
            metrics: MetricsRecorder::new(),
            observers: Observers::default(),
            clock,
            config,
        })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_hook(&mut self, task_id: &str, hook: Arc<dyn TaskHook>) {
        self.hooks.insert(task_id.to_string(), hook);
    }

    pub fn register_task_condition(&mut self, task_id: &str, condition: Arc<dyn Condition>) {
        self.conditions.set_task(task_id, condition);
    }

    pub fn register_dependency_condition(&mut self, from: &str, to: &str, condition: Arc<dyn Condition>) {
        self.conditions.set_dependency(from, to, condition);
    }

    pub fn on_task_ready(&mut self, f: impl Fn(&TaskInstance) + Send + Sync + 'static) {
        self.observers.on_task_ready(Box::new(f));
    }

    pub fn on_task_started(&mut self, f: impl Fn(&TaskInstance) + Send + Sync + 'static) {
        self.observers.on_task_started(Box::new(f));
    }

    pub fn on_task_complete(&mut self, f: impl Fn(&TaskInstance) + Send + Sync + 'static) {
        self.observers.on_task_complete(Box::new(f));
    }

    pub fn on_task_failed(&mut self, f: impl Fn(&TaskInstance) + Send + Sync + 'static) {
        self.observers.on_task_failed(Box::new(f));
    }

    pub fn on_case_complete(&mut self, f: impl Fn(&Case) + Send + Sync + 'static) {
        self.observers.on_case_complete(Box::new(f));
    }

    pub fn on_case_failed(&mut self, f: impl Fn(&Case) + Send + Sync + 'static) {
        self.observers.on_case_failed(Box::new(f));
    }

    pub fn on_alert(&mut self, f: impl Fn(&Alert) + Send + Sync + 'static) {
        self.observers.on_alert(Box::new(f));
    }

    // --- Case lifecycle ---

    /// Registers a new case, creates all its task instances and evaluates readiness.
    pub fn start_case(&self, case_id: &str, input: Variables, priority: Priority) -> EngineResult<Case> {
        if self.cases.contains_key(case_id) {
            return Err(EngineError::DuplicateCase(case_id.to_string()));
        }

        let now = self.clock.now();
        let mut case = Case::new(case_id, &self.workflow, priority, input, now);
        let mut events = Vec::new();
        self.advance(&mut case, now, &mut events);
        let snapshot = case.clone();

        match self.cases.entry(case_id.to_string()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateCase(case_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(case)));
            }
        }

        info!(case_id, workflow_id = %self.workflow.id, ?priority, "Case started");
        self.observers.dispatch(events);
        Ok(snapshot)
    }

    pub fn cancel_case(&self, case_id: &str) -> EngineResult<()> {
        self.transition(case_id, |case, _events| {
            if case.status.is_terminal() {
                return Err(EngineError::InvalidState(format!(
                    "case {} is already {:?}",
                    case.id, case.status
                )));
            }
            let now = self.clock.now();
            case.status = CaseStatus::Cancelled;
            case.completed_at = Some(now);
            self.cancel_open_tasks(case, now);
            info!(case_id = %case.id, "Case cancelled");
            Ok(())
        })
    }

    pub fn suspend_case(&self, case_id: &str) -> EngineResult<()> {
        self.transition(case_id, |case, _events| {
            if case.status != CaseStatus::Running {
                return Err(EngineError::InvalidState(format!(
                    "cannot suspend case {} in status {:?}",
                    case.id, case.status
                )));
            }
            case.status = CaseStatus::Suspended;
            info!(case_id = %case.id, "Case suspended");
            Ok(())
        })
    }

    pub fn resume_case(&self, case_id: &str) -> EngineResult<()> {
        self.transition(case_id, |case, _events| {
            if case.status != CaseStatus::Suspended {
                return Err(EngineError::InvalidState(format!(
                    "cannot resume case {} in status {:?}",
                    case.id, case.status
                )));
            }
            case.status = CaseStatus::Running;
            info!(case_id = %case.id, "Case resumed");
            Ok(())
        })
    }

    // --- Task state machine ---

    /// Ready -> Assigned, reserving every required resource or none.
    pub fn assign_task(&self, case_id: &str, task_id: &str, assignee: &str) -> EngineResult<()> {
        let task = self.task_def(case_id, task_id)?;
        self.transition(case_id, |case, _events| {
            ensure_running(case)?;
            let now = self.clock.now();
            let inst = instance_mut(case, task_id)?;
            if inst.status != TaskStatus::Ready {
                return Err(invalid_task_state("assign", inst));
            }
            self.resources.try_acquire_all(case_id, &task.required_resources)?;
            inst.holds_resources = true;
            inst.status = TaskStatus::Assigned;
            inst.assigned_at = Some(now);
            inst.assigned_to = Some(assignee.to_string());
            debug!(case_id, task_id, assignee, "Task assigned");
            Ok(())
        })
    }

    /// Assigned or Ready -> Running. From Ready the resources are reserved here.
    pub fn start_task(&self, case_id: &str, task_id: &str) -> EngineResult<()> {
        let task = self.task_def(case_id, task_id)?;
        self.transition(case_id, |case, events| {
            ensure_running(case)?;
            let now = self.clock.now();
            let inst = instance_mut(case, task_id)?;
            match inst.status {
                TaskStatus::Assigned => {}
                TaskStatus::Ready => {
                    self.resources.try_acquire_all(case_id, &task.required_resources)?;
                    inst.holds_resources = true;
                }
                _ => return Err(invalid_task_state("start", inst)),
            }
            inst.status = TaskStatus::Running;
            inst.started_at = Some(now);
            inst.wait_duration = elapsed(inst.ready_at, now);
            self.metrics.record_execution(task_id);
            debug!(case_id, task_id, "Task started");

            self.run_hook(case, task_id, HookStage::Start, None, None);
            events.push(Event::TaskStarted(snapshot(case, task_id)));
            // StartToStart successors may now be enabled.
            self.advance(case, now, events);
            Ok(())
        })
    }

    /// Running -> Completed; releases and produces resources, merges the
    /// output into the case variables, then completes the case or
    /// re-evaluates readiness.
    pub fn complete_task(&self, case_id: &str, task_id: &str, output: Variables) -> EngineResult<()> {
        let task = self.task_def(case_id, task_id)?;
        self.transition(case_id, |case, events| {
            ensure_running(case)?;
            let inst = instance(case, task_id)?;
            if inst.status != TaskStatus::Running {
                return Err(invalid_task_state("complete", inst));
            }
            self.resources.ensure_declared(&task.produced_resources)?;

            let now = self.clock.now();
            let inst = instance_mut(case, task_id)?;
            inst.status = TaskStatus::Completed;
            inst.completed_at = Some(now);
            inst.work_duration = elapsed(inst.started_at, now);
            inst.total_duration = elapsed(inst.ready_at, now);
            inst.output = output.clone();
            self.release_held(case_id, task, inst);
            self.resources.produce_all(&task.produced_resources)?;

            case.variables.extend(output.clone());
            case.mark_finished(task_id);
            self.metrics.record_success(task_id);
            debug!(case_id, task_id, "Task completed");

            self.run_hook(case, task_id, HookStage::Complete, Some(&output), None);
            events.push(Event::TaskComplete(snapshot(case, task_id)));
            self.advance(case, now, events);
            Ok(())
        })
    }

    /// Reports a business failure. Retries while `max_retries` allows,
    /// then applies the task's `FailureAction`.
    pub fn fail_task(&self, case_id: &str, task_id: &str, error: &str) -> EngineResult<()> {
        let task = self.task_def(case_id, task_id)?;
        self.transition(case_id, |case, events| {
            ensure_running(case)?;
            let now = self.clock.now();
            let inst = instance_mut(case, task_id)?;
            if !inst.status.is_active() {
                return Err(invalid_task_state("fail", inst));
            }
            self.release_held(case_id, task, inst);
            inst.error = Some(error.to_string());

            if inst.retry_count < task.max_retries {
                inst.retry_count += 1;
                inst.status = TaskStatus::Ready;
                inst.ready_at = Some(now);
                inst.assigned_at = None;
                inst.assigned_to = None;
                inst.started_at = None;
                self.metrics.record_retry(task_id);
                warn!(case_id, task_id, attempt = inst.retry_count, max_retries = task.max_retries, error, "Task failed, retrying");
                if self.config.notify_on_retry {
                    events.push(Event::TaskReady(inst.clone()));
                }
                return Ok(());
            }

            inst.status = TaskStatus::Failed;
            inst.completed_at = Some(now);
            case.drop_current(task_id);
            self.metrics.record_failure(task_id);
            warn!(case_id, task_id, error, action = ?task.failure_action, "Task failed");

            self.run_hook(case, task_id, HookStage::Fail, None, Some(error));
            events.push(Event::TaskFailed(snapshot(case, task_id)));

            match task.failure_action {
                FailureAction::Skip => {
                    case.mark_finished(task_id);
                    self.advance(case, now, events);
                }
                FailureAction::Abort => {
                    let reason = format!("task {} failed: {}", task_id, error);
                    self.fail_case(case, reason, now, events);
                }
                FailureAction::Escalate => {
                    let alert = Alert::new(
                        AlertType::TaskFailed,
                        Severity::Critical,
                        case_id,
                        Some(task_id),
                        format!("task {} failed after {} retries: {}", task_id, task.max_retries, error),
                        now,
                    );
                    warn!(case_id, task_id, alert_id = %alert.id, "Task failure escalated");
                    events.push(Event::Alert(alert));
                }
            }
            Ok(())
        })
    }

    // --- Queries ---

    pub fn get_case(&self, case_id: &str) -> Option<Case> {
        let handle = self.cases.get(case_id).map(|r| r.value().clone())?;
        let case = handle.lock().clone();
        Some(case)
    }

    /// Matching cases ordered by creation time, then id.
    pub fn get_cases(&self, filter: &CaseFilter) -> Vec<Case> {
        let mut cases: Vec<Case> = self
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let case = handle.lock();
                filter.matches(&case).then(|| case.clone())
            })
            .collect();
        cases.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        cases
    }

    /// Ready tasks of all running cases, highest case priority first, then oldest.
    pub fn get_ready_tasks(&self) -> Vec<TaskInstance> {
        let mut ready: Vec<(Priority, TaskInstance)> = Vec::new();
        for handle in self.handles() {
            let case = handle.lock();
            if case.status != CaseStatus::Running {
                continue;
            }
            ready.extend(
                case.task_instances
                    .values()
                    .filter(|t| t.status == TaskStatus::Ready)
                    .map(|t| (case.priority, t.clone())),
            );
        }
        ready.sort_by(|(pa, a), (pb, b)| {
            pb.cmp(pa)
                .then_with(|| a.ready_at.cmp(&b.ready_at))
                .then_with(|| a.case_id.cmp(&b.case_id))
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        ready.into_iter().map(|(_, t)| t).collect()
    }

    pub fn get_resource_availability(&self) -> BTreeMap<String, f64> {
        self.resources.availability()
    }

    pub fn resource_snapshot(&self) -> BTreeMap<String, PoolSnapshot> {
        self.resources.snapshot()
    }

    // --- SLA ---

    /// Evaluates every running case and running task against its deadline.
    ///
    /// Alerts are returned and also delivered to `on_alert` observers. A task
    /// breaching with `BreachAction::Escalate` moves to Escalated.
    pub fn check_slas(&self) -> Vec<Alert> {
        let now = self.clock.now();
        let mut alerts = Vec::new();

        for handle in self.handles() {
            let mut guard = handle.lock();
            let case = &mut *guard;
            if case.status != CaseStatus::Running {
                continue;
            }

            if let (Some(deadline), Some(policy)) = (case.deadline, self.workflow.sla.as_ref()) {
                let ratio = sla::elapsed_ratio(case.started_at, deadline, now);
                let crossed = sla::crossed(ratio, policy.warning_at, policy.critical_at);
                for level in sla::to_emit(self.config.alert_mode, crossed, &mut case.sla_level) {
                    let message = format!("case {} at {:.0}% of its SLA window", case.id, ratio * 100.0);
                    alerts.push(Alert::new(sla::alert_type_for(level), level, &case.id, None, message, now));
                }
            }

            let mut escalate = Vec::new();
            for inst in case.task_instances.values_mut() {
                if inst.status != TaskStatus::Running {
                    continue;
                }
                let (Some(deadline), Some(task_sla)) = (inst.deadline, self.task_sla(&inst.task_id)) else {
                    continue;
                };
                let start = inst.started_at.unwrap_or(inst.created_at);
                let ratio = sla::elapsed_ratio(start, deadline, now);
                let crossed = sla::crossed(ratio, task_sla.warning_at, task_sla.critical_at);
                let breached = crossed.contains(&Severity::Critical);
                for level in sla::to_emit(self.config.alert_mode, crossed, &mut inst.sla_level) {
                    let message = format!("task {} at {:.0}% of its SLA window", inst.task_id, ratio * 100.0);
                    alerts.push(Alert::new(sla::alert_type_for(level), level, &case.id, Some(&inst.task_id), message, now));
                }
                if breached && task_sla.breach_action == BreachAction::Escalate {
                    escalate.push(inst.task_id.clone());
                }
            }

            for task_id in escalate {
                let Some(task) = self.task(&task_id) else { continue };
                if let Some(inst) = case.task_instances.get_mut(&task_id) {
                    inst.status = TaskStatus::Escalated;
                    inst.completed_at = Some(now);
                    self.release_held(&case.id, task, inst);
                }
                case.drop_current(&task_id);
                warn!(case_id = %case.id, task_id = %task_id, "Task escalated after SLA breach");
            }
        }

        for alert in &alerts {
            warn!(case_id = %alert.case_id, task_id = ?alert.task_id, severity = ?alert.severity, "{}", alert.message);
        }
        self.observers.dispatch(alerts.iter().cloned().map(Event::Alert).collect());
        alerts
    }

    // --- Metrics ---

    pub fn get_metrics(&self) -> Metrics {
        let cases = self.get_cases(&CaseFilter::default());
        let mut cases_by_status = BTreeMap::new();
        let mut durations = Vec::new();
        for case in &cases {
            *cases_by_status.entry(case.status).or_insert(0) += 1;
            if case.status == CaseStatus::Completed {
                durations.extend(case.duration());
            }
        }

        Metrics {
            generated_at: self.clock.now(),
            total_cases: cases.len(),
            cases_by_status,
            average_case_duration: metrics::average(&durations),
            task_metrics: self.metrics.task_snapshot(),
            resource_utilization: self
                .resources
                .snapshot()
                .into_iter()
                .map(|(id, pool)| (id, pool.utilization()))
                .collect(),
        }
    }

    // --- Internals ---

    /// Locks the case for the whole call and dispatches queued events after unlocking.
    fn transition<F>(&self, case_id: &str, f: F) -> EngineResult<()>
    where
        F: FnOnce(&mut Case, &mut Vec<Event>) -> EngineResult<()>,
    {
        let handle = self
            .cases
            .get(case_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| EngineError::CaseNotFound(case_id.to_string()))?;

        let mut events = Vec::new();
        let result = {
            let mut guard = handle.lock();
            f(&mut *guard, &mut events)
        };
        self.observers.dispatch(events);
        result
    }

    fn handles(&self) -> Vec<Arc<Mutex<Case>>> {
        self.cases.iter().map(|r| r.value().clone()).collect()
    }

    fn task(&self, task_id: &str) -> Option<&Task> {
        self.task_index.get(task_id).map(|idx| &self.workflow.tasks[*idx])
    }

    fn task_def(&self, case_id: &str, task_id: &str) -> EngineResult<&Task> {
        if !self.cases.contains_key(case_id) {
            return Err(EngineError::CaseNotFound(case_id.to_string()));
        }
        self.task(task_id).ok_or_else(|| EngineError::TaskNotFound {
            case_id: case_id.to_string(),
            task_id: task_id.to_string(),
        })
    }

    fn task_sla(&self, task_id: &str) -> Option<&TaskSla> {
        self.task(task_id).and_then(|t| t.sla.as_ref())
    }

    fn release_held(&self, case_id: &str, task: &Task, inst: &mut TaskInstance) {
        if inst.holds_resources {
            self.resources.release_all(case_id, &task.required_resources);
            inst.holds_resources = false;
        }
    }

    /// Completes the case when every end task is finished, otherwise
    /// re-evaluates readiness and checks again.
    fn advance(&self, case: &mut Case, now: DateTime<Utc>, events: &mut Vec<Event>) {
        if self.try_complete_case(case, now, events) {
            return;
        }
        for outcome in self.graph.evaluate(case, &self.workflow, &self.conditions, now) {
            if let Readiness::Ready(task_id) = outcome {
                events.push(Event::TaskReady(snapshot(case, &task_id)));
            }
        }
        self.try_complete_case(case, now, events);
    }

    fn try_complete_case(&self, case: &mut Case, now: DateTime<Utc>, events: &mut Vec<Event>) -> bool {
        if case.status != CaseStatus::Running || self.workflow.end_task_ids.is_empty() {
            return false;
        }
        let all_done = self.workflow.end_task_ids.iter().all(|id| {
            case.task(id).is_some_and(|inst| self.graph.is_finished(inst))
        });
        if !all_done {
            return false;
        }

        let mut output = Variables::new();
        for end_id in &self.workflow.end_task_ids {
            if let Some(inst) = case.task(end_id) {
                output.extend(inst.output.clone());
            }
        }
        case.output = output;
        case.status = CaseStatus::Completed;
        case.completed_at = Some(now);
        self.cancel_open_tasks(case, now);
        info!(case_id = %case.id, duration = ?case.duration(), "Case completed");
        events.push(Event::CaseComplete(case.clone()));
        true
    }

    fn fail_case(&self, case: &mut Case, reason: String, now: DateTime<Utc>, events: &mut Vec<Event>) {
        case.status = CaseStatus::Failed;
        case.completed_at = Some(now);
        case.error = Some(reason);
        self.cancel_open_tasks(case, now);
        warn!(case_id = %case.id, error = ?case.error, "Case failed");
        events.push(Event::CaseFailed(case.clone()));
    }

    /// Forces every non-terminal task to Cancelled and releases what it holds.
    fn cancel_open_tasks(&self, case: &mut Case, now: DateTime<Utc>) {
        for inst in case.task_instances.values_mut() {
            if inst.status.is_terminal() {
                continue;
            }
            if let Some(task) = self.task(&inst.task_id) {
                self.release_held(&case.id, task, inst);
            }
            inst.status = TaskStatus::Cancelled;
            inst.completed_at = Some(now);
        }
        case.current_tasks.clear();
    }

    fn run_hook(&self, case: &mut Case, task_id: &str, stage: HookStage, output: Option<&Variables>, error: Option<&str>) {
        let Some(hook) = self.hooks.get(task_id) else {
            return;
        };
        let mut ctx = ExecutionContext {
            case_id: &case.id,
            task_id,
            input: &case.input,
            variables: &mut case.variables,
            output,
            error,
        };
        let result = match stage {
            HookStage::Start => hook.on_start(&mut ctx),
            HookStage::Complete => hook.on_complete(&mut ctx),
            HookStage::Fail => hook.on_fail(&mut ctx),
        };
        if let Err(e) = result {
            warn!(case_id = %case.id, task_id, ?stage, error = ?e, "Task hook failed");
        }
    }
}

fn ensure_running(case: &Case) -> EngineResult<()> {
    if case.status != CaseStatus::Running {
        return Err(EngineError::InvalidState(format!(
            "case {} is {:?}",
            case.id, case.status
        )));
    }
    Ok(())
}

fn instance<'a>(case: &'a Case, task_id: &str) -> EngineResult<&'a TaskInstance> {
    case.task_instances.get(task_id).ok_or_else(|| EngineError::TaskNotFound {
        case_id: case.id.clone(),
        task_id: task_id.to_string(),
    })
}

fn instance_mut<'a>(case: &'a mut Case, task_id: &str) -> EngineResult<&'a mut TaskInstance> {
    let case_id = &case.id;
    case.task_instances.get_mut(task_id).ok_or_else(|| EngineError::TaskNotFound {
        case_id: case_id.clone(),
        task_id: task_id.to_string(),
    })
}

fn invalid_task_state(op: &str, inst: &TaskInstance) -> EngineError {
    EngineError::InvalidState(format!(
        "cannot {} task {} in case {}: status is {:?}",
        op, inst.task_id, inst.case_id, inst.status
    ))
}

fn snapshot(case: &Case, task_id: &str) -> TaskInstance {
    case.task_instances
        .get(task_id)
        .cloned()
        .unwrap_or_else(|| TaskInstance::new(task_id, &case.id, case.created_at, None))
}
