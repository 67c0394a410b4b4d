mod common;

use caseflow::{CaseStatus, EngineError, Priority, Task, TaskStatus, Variables};
use common::{assert_pools_consistent, engine_with_clock, linear_workflow, requires, resource, single_task_workflow};
use std::sync::Arc;

#[test]
fn test_second_case_waits_for_released_resource() {
    let mut task = Task::new("T");
    requires(&mut task, "R", 1.0);
    let mut wf = single_task_workflow(task);
    wf.resources.push(resource("R", 1.0));
    let (engine, _clock) = engine_with_clock(wf);

    engine.start_case("c1", Variables::new(), Priority::Normal).unwrap();
    engine.start_case("c2", Variables::new(), Priority::Normal).unwrap();

    // 1. First case takes the only unit
    engine.assign_task("c1", "T", "w1").unwrap();
    assert_eq!(engine.get_resource_availability()["R"], 0.0);

    // 2. Second case is refused and stays ready
    let err = engine.assign_task("c2", "T", "w2").unwrap_err();
    assert!(matches!(err, EngineError::ResourceUnavailable { ref resource_id, .. } if resource_id == "R"));
    let c2 = engine.get_case("c2").unwrap();
    assert_eq!(c2.task_status("T"), Some(TaskStatus::Ready));
    assert!(!c2.task("T").unwrap().holds_resources);

    // 3. Completion frees the unit for the waiter
    engine.start_task("c1", "T").unwrap();
    engine.complete_task("c1", "T", Variables::new()).unwrap();
    assert_eq!(engine.get_resource_availability()["R"], 1.0);

    engine.assign_task("c2", "T", "w2").unwrap();
    assert_eq!(engine.get_case("c2").unwrap().task_status("T"), Some(TaskStatus::Assigned));
    assert_pools_consistent(&engine);
}

#[test]
fn test_failed_acquisition_reserves_nothing() {
    let mut task = Task::new("T");
    requires(&mut task, "Cpu", 1.0);
    requires(&mut task, "Gpu", 1.0);
    let mut wf = single_task_workflow(task);
    wf.resources.push(resource("Cpu", 4.0));
    wf.resources.push(resource("Gpu", 1.0));
    let (engine, _clock) = engine_with_clock(wf);

    engine.start_case("c1", Variables::new(), Priority::Normal).unwrap();
    engine.start_case("c2", Variables::new(), Priority::Normal).unwrap();
    engine.assign_task("c1", "T", "w1").unwrap();

    assert!(engine.assign_task("c2", "T", "w2").is_err());
    let availability = engine.get_resource_availability();
    assert_eq!(availability["Cpu"], 3.0);
    assert_eq!(availability["Gpu"], 0.0);
    assert_pools_consistent(&engine);
}

#[test]
fn test_undeclared_requirement_is_policy_violation() {
    let mut task = Task::new("T");
    requires(&mut task, "Ghost", 1.0);
    let (engine, _clock) = engine_with_clock(single_task_workflow(task));
    engine.start_case("c1", Variables::new(), Priority::Normal).unwrap();

    let err = engine.assign_task("c1", "T", "w1").unwrap_err();
    assert!(matches!(err, EngineError::PolicyViolation(_)));
    assert_eq!(engine.get_case("c1").unwrap().task_status("T"), Some(TaskStatus::Ready));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cases_share_pool() {
    let mut wf = linear_workflow();
    wf.resources.push(resource("R", 2.0));
    requires(&mut wf.tasks[1], "R", 1.0);
    let (engine, _clock) = engine_with_clock(wf);
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for n in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let case_id = format!("case-{}", n);
            engine.start_case(&case_id, Variables::new(), Priority::Normal).unwrap();
            for task_id in ["Start", "A", "End"] {
                loop {
                    match engine.assign_task(&case_id, task_id, "worker") {
                        Ok(()) => break,
                        Err(EngineError::ResourceUnavailable { .. }) => tokio::task::yield_now().await,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                engine.start_task(&case_id, task_id).unwrap();
                tokio::task::yield_now().await;
                engine.complete_task(&case_id, task_id, Variables::new()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.expect("case driver panicked");
    }

    let metrics = engine.get_metrics();
    assert_eq!(metrics.case_count(CaseStatus::Completed), 16);
    assert_eq!(metrics.task("A").success_count, 16);
    assert_eq!(engine.get_resource_availability()["R"], 2.0);
    assert_pools_consistent(&engine);
}
