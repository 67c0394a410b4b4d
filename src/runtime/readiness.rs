//! Dependency and join evaluation.

use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::debug;
use crate::dsl::{Dependency, DependencyType, FailureAction, JoinType, Workflow};
use crate::error::{EngineError, EngineResult};
use crate::runtime::case::{Case, TaskInstance, TaskStatus};
use crate::runtime::hooks::{Condition, ExecutionContext, ExpressionCondition};

/// Outcome of evaluating one pending task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready(String),
    Skipped(String),
}

/// Conditions attached to tasks and dependencies.
///
/// Built from the expressions in the definition; registered strategies
/// replace the expression for the same target.
#[derive(Default)]
pub struct ConditionSet {
    tasks: HashMap<String, Arc<dyn Condition>>,
    dependencies: HashMap<(String, String), Arc<dyn Condition>>,
}

impl ConditionSet {
    pub fn from_workflow(workflow: &Workflow) -> EngineResult<Self> {
        let mut set = Self::default();
        for task in &workflow.tasks {
            if let Some(expr) = &task.condition {
                let compiled = ExpressionCondition::compile(&task.id, expr)?;
                set.tasks.insert(task.id.clone(), Arc::new(compiled));
            }
        }
        for dep in &workflow.dependencies {
            if let Some(expr) = &dep.condition {
                let target = format!("{} -> {}", dep.from_task_id, dep.to_task_id);
                let compiled = ExpressionCondition::compile(&target, expr)?;
                set.dependencies.insert(dep_key(dep), Arc::new(compiled));
            }
        }
        Ok(set)
    }

    pub fn set_task(&mut self, task_id: &str, condition: Arc<dyn Condition>) {
        self.tasks.insert(task_id.to_string(), condition);
    }

    pub fn set_dependency(&mut self, from: &str, to: &str, condition: Arc<dyn Condition>) {
        self.dependencies.insert((from.to_string(), to.to_string()), condition);
    }

    fn task(&self, task_id: &str) -> Option<&Arc<dyn Condition>> {
        self.tasks.get(task_id)
    }

    fn dependency(&self, dep: &Dependency) -> Option<&Arc<dyn Condition>> {
        self.dependencies.get(&dep_key(dep))
    }
}

fn dep_key(dep: &Dependency) -> (String, String) {
    (dep.from_task_id.clone(), dep.to_task_id.clone())
}

/// Incoming-edge index over a workflow.
#[derive(Debug)]
pub struct DependencyGraph {
    incoming: HashMap<String, Vec<Dependency>>,
    order: Vec<String>,
    start_task_id: String,
    skip_on_failure: HashMap<String, bool>,
}

impl DependencyGraph {
    pub fn new(workflow: &Workflow) -> EngineResult<Self> {
        let mut order = Vec::with_capacity(workflow.tasks.len());
        let mut skip_on_failure = HashMap::new();
        for task in &workflow.tasks {
            let skip = task.failure_action == FailureAction::Skip;
            if skip_on_failure.insert(task.id.clone(), skip).is_some() {
                return Err(EngineError::PolicyViolation(format!("duplicate task id: {}", task.id)));
            }
            order.push(task.id.clone());
        }

        let mut incoming: HashMap<String, Vec<Dependency>> = HashMap::new();
        for dep in &workflow.dependencies {
            incoming.entry(dep.to_task_id.clone()).or_default().push(dep.clone());
        }

        Ok(Self {
            incoming,
            order,
            start_task_id: workflow.start_task_id.clone(),
            skip_on_failure,
        })
    }

    pub fn incoming(&self, task_id: &str) -> &[Dependency] {
        self.incoming.get(task_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Finished for successor purposes: completed, skipped, or failed with `Skip`.
    pub fn is_finished(&self, instance: &TaskInstance) -> bool {
        match instance.status {
            TaskStatus::Completed | TaskStatus::Skipped => true,
            TaskStatus::Failed => self.skip_on_failure.get(&instance.task_id).copied().unwrap_or(false),
            _ => false,
        }
    }

    fn is_started(&self, instance: &TaskInstance) -> bool {
        instance.status == TaskStatus::Running || self.is_finished(instance)
    }

    fn dependency_satisfied(&self, dep: &Dependency, case: &Case, ctx: &ExecutionContext<'_>, conditions: &ConditionSet) -> bool {
        let satisfied = match case.task(&dep.from_task_id) {
            None => false,
            Some(pred) => match dep.kind {
                DependencyType::FinishToStart => self.is_finished(pred),
                DependencyType::StartToStart => self.is_started(pred),
                // Only constrain finishing; never gate a start.
                DependencyType::FinishToFinish | DependencyType::StartToFinish => true,
            },
        };
        satisfied && conditions.dependency(dep).is_none_or(|c| c.evaluate(ctx))
    }

    fn join_satisfied(&self, join: JoinType, satisfied: usize, total: usize) -> bool {
        match join {
            JoinType::All => satisfied == total,
            JoinType::Any => satisfied >= 1,
            JoinType::N(n) => satisfied >= n,
        }
    }

    /// Re-scans every pending task of the case until nothing changes.
    ///
    /// Ready tasks join `current_tasks`; tasks whose own condition is false
    /// are skipped and recorded as finished, which may unlock further tasks.
    pub fn evaluate(
        &self,
        case: &mut Case,
        workflow: &Workflow,
        conditions: &ConditionSet,
        now: DateTime<Utc>,
    ) -> Vec<Readiness> {
        let mut outcomes = Vec::new();
        loop {
            let mut variables = std::mem::take(&mut case.variables);
            let mut pass = Vec::new();

            for task_id in &self.order {
                if case.task_status(task_id) != Some(TaskStatus::Pending) {
                    continue;
                }
                let join = workflow.task(task_id).map(|t| t.join).unwrap_or_default();
                let ctx = ExecutionContext {
                    case_id: &case.id,
                    task_id,
                    input: &case.input,
                    variables: &mut variables,
                    output: None,
                    error: None,
                };

                let deps = self.incoming(task_id);
                let enabled = if deps.is_empty() {
                    *task_id == self.start_task_id
                } else {
                    let satisfied = deps
                        .iter()
                        .filter(|dep| self.dependency_satisfied(dep, case, &ctx, conditions))
                        .count();
                    self.join_satisfied(join, satisfied, deps.len())
                };
                if !enabled {
                    continue;
                }

                if conditions.task(task_id).is_none_or(|c| c.evaluate(&ctx)) {
                    pass.push(Readiness::Ready(task_id.clone()));
                } else {
                    pass.push(Readiness::Skipped(task_id.clone()));
                }
            }
            case.variables = variables;

            let any_skipped = pass.iter().any(|r| matches!(r, Readiness::Skipped(_)));
            for outcome in &pass {
                match outcome {
                    Readiness::Ready(task_id) => {
                        if let Some(inst) = case.task_instances.get_mut(task_id) {
                            inst.status = TaskStatus::Ready;
                            inst.ready_at = Some(now);
                        }
                        case.mark_current(task_id);
                        debug!(case_id = %case.id, task_id = %task_id, "Task ready");
                    }
                    Readiness::Skipped(task_id) => {
                        if let Some(inst) = case.task_instances.get_mut(task_id) {
                            inst.status = TaskStatus::Skipped;
                            inst.completed_at = Some(now);
                        }
                        case.mark_finished(task_id);
                        debug!(case_id = %case.id, task_id = %task_id, "Task skipped by condition");
                    }
                }
            }
            outcomes.extend(pass);

            if !any_skipped {
                break;
            }
        }
        outcomes
    }
}
