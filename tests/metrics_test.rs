mod common;

use caseflow::{CaseStatus, Clock, Priority, Task, Variables};
use common::{engine_with_clock, linear_workflow, requires, resource, run_task, single_task_workflow};
use std::time::Duration;

#[test]
fn test_metrics_on_fresh_engine() {
    let (engine, _clock) = engine_with_clock(linear_workflow());
    let metrics = engine.get_metrics();

    assert_eq!(metrics.total_cases, 0);
    assert!(metrics.cases_by_status.is_empty());
    assert_eq!(metrics.average_case_duration, None);
    assert!(metrics.task_metrics.is_empty());
}

#[test]
fn test_case_counts_and_average_duration() {
    let (engine, clock) = engine_with_clock(single_task_workflow(Task::new("T")));

    // Completed after 10s
    engine.start_case("fast", Variables::new(), Priority::Normal).unwrap();
    clock.advance_secs(10);
    run_task(&engine, "fast", "T", Variables::new());

    // Completed after 30s
    engine.start_case("slow", Variables::new(), Priority::Normal).unwrap();
    clock.advance_secs(30);
    run_task(&engine, "slow", "T", Variables::new());

    engine.start_case("cancelled", Variables::new(), Priority::Normal).unwrap();
    engine.cancel_case("cancelled").unwrap();
    engine.start_case("open", Variables::new(), Priority::Low).unwrap();

    let metrics = engine.get_metrics();
    assert_eq!(metrics.total_cases, 4);
    assert_eq!(metrics.case_count(CaseStatus::Completed), 2);
    assert_eq!(metrics.case_count(CaseStatus::Cancelled), 1);
    assert_eq!(metrics.case_count(CaseStatus::Running), 1);
    assert_eq!(metrics.case_count(CaseStatus::Failed), 0);
    assert_eq!(metrics.average_case_duration, Some(Duration::from_secs(20)));
    assert_eq!(metrics.generated_at, clock.now());
}

#[test]
fn test_task_counters() {
    let mut task = Task::new("T");
    task.max_retries = 1;
    let (engine, _clock) = engine_with_clock(single_task_workflow(task));
    engine.start_case("c1", Variables::new(), Priority::Normal).unwrap();

    engine.start_task("c1", "T").unwrap();
    engine.fail_task("c1", "T", "flaky").unwrap();
    engine.start_task("c1", "T").unwrap();
    engine.complete_task("c1", "T", Variables::new()).unwrap();

    let t = engine.get_metrics().task("T");
    assert_eq!(t.execution_count, 2);
    assert_eq!(t.retry_count, 1);
    assert_eq!(t.success_count, 1);
    assert_eq!(t.failure_count, 0);
}

#[test]
fn test_resource_utilization() {
    let mut task = Task::new("T");
    requires(&mut task, "R", 1.0);
    let mut wf = single_task_workflow(task);
    wf.resources.push(resource("R", 4.0));
    let (engine, _clock) = engine_with_clock(wf);

    assert_eq!(engine.get_metrics().resource_utilization["R"], 0.0);

    engine.start_case("c1", Variables::new(), Priority::Normal).unwrap();
    engine.start_case("c2", Variables::new(), Priority::Normal).unwrap();
    engine.assign_task("c1", "T", "w").unwrap();
    engine.assign_task("c2", "T", "w").unwrap();
    assert_eq!(engine.get_metrics().resource_utilization["R"], 0.5);
}

#[test]
fn test_metrics_serialize_to_json() {
    let (engine, _clock) = engine_with_clock(single_task_workflow(Task::new("T")));
    engine.start_case("c1", Variables::new(), Priority::Normal).unwrap();
    run_task(&engine, "c1", "T", Variables::new());

    let json = serde_json::to_value(engine.get_metrics()).unwrap();
    assert_eq!(json["total_cases"], 1);
    assert_eq!(json["cases_by_status"]["Completed"], 1);
    assert_eq!(json["task_metrics"]["T"]["success_count"], 1);
}
