#![allow(dead_code)]

use caseflow::{
    Dependency, DependencyType, Engine, EngineConfig, ManualClock, Resource, ResourceRequirement,
    Task, Variables, Workflow,
};
use serde_json::Value;
use std::sync::Arc;

pub fn workflow(id: &str, start: &str, ends: &[&str], tasks: Vec<Task>, deps: Vec<Dependency>) -> Workflow {
    Workflow {
        id: id.to_string(),
        start_task_id: start.to_string(),
        end_task_ids: ends.iter().map(|s| s.to_string()).collect(),
        tasks,
        dependencies: deps,
        resources: Vec::new(),
        sla: None,
    }
}

/// Start -> A -> End, all FinishToStart.
pub fn linear_workflow() -> Workflow {
    workflow(
        "linear",
        "Start",
        &["End"],
        vec![Task::new("Start"), Task::new("A"), Task::new("End")],
        vec![fts("Start", "A"), fts("A", "End")],
    )
}

/// A single task that is both the entry and the only end task.
pub fn single_task_workflow(task: Task) -> Workflow {
    let id = task.id.clone();
    workflow("single", &id, &[&id], vec![task], Vec::new())
}

pub fn fts(from: &str, to: &str) -> Dependency {
    Dependency::new(from, to, DependencyType::FinishToStart)
}

pub fn resource(id: &str, capacity: f64) -> Resource {
    Resource {
        id: id.to_string(),
        capacity,
    }
}

pub fn requires(task: &mut Task, resource_id: &str, quantity: f64) {
    task.required_resources.push(ResourceRequirement::new(resource_id, quantity));
}

pub fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn engine_with_clock(workflow: Workflow) -> (Engine, Arc<ManualClock>) {
    engine_with_config(workflow, EngineConfig::default())
}

pub fn engine_with_config(workflow: Workflow, config: EngineConfig) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let engine = Engine::with_options(workflow, config, clock.clone()).expect("engine");
    (engine, clock)
}

/// Starts and completes a task in one go.
pub fn run_task(engine: &Engine, case_id: &str, task_id: &str, output: Variables) {
    engine.start_task(case_id, task_id).expect("start task");
    engine.complete_task(case_id, task_id, output).expect("complete task");
}

/// `available + reserved == capacity` for every pool.
pub fn assert_pools_consistent(engine: &Engine) {
    for (id, pool) in engine.resource_snapshot() {
        let total = pool.available + pool.reserved_total();
        assert!(
            (total - pool.capacity).abs() < 1e-9,
            "pool {} inconsistent: available {} + reserved {} != capacity {}",
            id, pool.available, pool.reserved_total(), pool.capacity
        );
        assert!(pool.available >= 0.0, "pool {} went negative", id);
    }
}
