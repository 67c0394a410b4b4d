mod common;

use caseflow::runtime::resource::{ResourceManager, ResourcePool};
use caseflow::{EngineError, ResourceRequirement};
use common::resource;
use std::sync::Arc;
use std::thread;

fn req(id: &str, quantity: f64) -> ResourceRequirement {
    ResourceRequirement::new(id, quantity)
}

fn assert_consistent(manager: &ResourceManager) {
    for (id, pool) in manager.snapshot() {
        let total = pool.available + pool.reserved_total();
        assert!((total - pool.capacity).abs() < 1e-9, "pool {} lost capacity", id);
        assert!(pool.available >= 0.0, "pool {} went negative", id);
    }
}

#[test]
fn test_acquire_and_release_single_pool() {
    let pool = ResourcePool::new("R", 3.0);
    pool.try_acquire("c1", 2.0).unwrap();
    assert_eq!(pool.available(), 1.0);

    let err = pool.try_acquire("c2", 2.0).unwrap_err();
    assert_eq!(
        err,
        EngineError::ResourceUnavailable {
            resource_id: "R".to_string(),
            requested: 2.0,
            available: 1.0,
        }
    );

    pool.release("c1", 2.0);
    let snap = pool.snapshot();
    assert_eq!(snap.available, 3.0);
    assert!(snap.reserved.is_empty());
}

#[test]
fn test_release_is_clamped_to_reservation() {
    let pool = ResourcePool::new("R", 2.0);
    pool.try_acquire("c1", 1.0).unwrap();

    pool.release("c1", 5.0);
    pool.release("stranger", 1.0);

    let snap = pool.snapshot();
    assert_eq!(snap.available, 2.0);
    assert_eq!(snap.capacity, 2.0);
}

#[test]
fn test_multi_resource_acquisition_is_all_or_nothing() {
    let manager = ResourceManager::new(&[resource("R1", 2.0), resource("R2", 1.0)]).unwrap();

    let err = manager
        .try_acquire_all("c1", &[req("R1", 1.0), req("R2", 2.0)])
        .unwrap_err();
    assert!(matches!(err, EngineError::ResourceUnavailable { ref resource_id, .. } if resource_id == "R2"));

    // Nothing was reserved on R1
    let availability = manager.availability();
    assert_eq!(availability["R1"], 2.0);
    assert_eq!(availability["R2"], 1.0);

    manager.try_acquire_all("c1", &[req("R1", 1.0), req("R2", 1.0)]).unwrap();
    let availability = manager.availability();
    assert_eq!(availability["R1"], 1.0);
    assert_eq!(availability["R2"], 0.0);
    assert_consistent(&manager);
}

#[test]
fn test_repeated_requirements_are_summed() {
    let manager = ResourceManager::new(&[resource("R", 3.0)]).unwrap();

    let err = manager
        .try_acquire_all("c1", &[req("R", 2.0), req("R", 2.0)])
        .unwrap_err();
    assert!(matches!(err, EngineError::ResourceUnavailable { requested, .. } if requested == 4.0));
    assert_eq!(manager.availability()["R"], 3.0);
}

#[test]
fn test_undeclared_resource_is_policy_violation() {
    let manager = ResourceManager::new(&[resource("R", 1.0)]).unwrap();
    let err = manager.try_acquire_all("c1", &[req("R", 1.0), req("Ghost", 1.0)]).unwrap_err();
    assert!(matches!(err, EngineError::PolicyViolation(_)));
    assert_eq!(manager.availability()["R"], 1.0);

    assert!(manager.produce_all(&[req("Ghost", 1.0)]).is_err());
}

#[test]
fn test_duplicate_resource_ids_rejected() {
    let err = ResourceManager::new(&[resource("R", 1.0), resource("R", 2.0)]).unwrap_err();
    assert!(matches!(err, EngineError::PolicyViolation(_)));
}

#[test]
fn test_produce_grows_capacity() {
    let manager = ResourceManager::new(&[resource("Tokens", 0.0)]).unwrap();
    assert!(manager.try_acquire_all("c1", &[req("Tokens", 1.0)]).is_err());

    manager.produce_all(&[req("Tokens", 2.0)]).unwrap();
    manager.try_acquire_all("c1", &[req("Tokens", 1.0)]).unwrap();

    let snapshot = manager.snapshot();
    let snap = &snapshot["Tokens"];
    assert_eq!(snap.capacity, 2.0);
    assert_eq!(snap.available, 1.0);
    assert_eq!(snap.reserved["c1"], 1.0);
    assert_eq!(snap.utilization(), 0.5);
}

#[test]
fn test_empty_requirements_always_succeed() {
    let manager = ResourceManager::new(&[]).unwrap();
    manager.try_acquire_all("c1", &[]).unwrap();
    assert!(manager.availability().is_empty());
}

#[test]
fn test_concurrent_acquisition_keeps_pool_consistent() {
    // Opposite declaration orders per worker would deadlock without ordered locking
    let manager = Arc::new(ResourceManager::new(&[resource("A", 3.0), resource("B", 3.0)]).unwrap());

    thread::scope(|s| {
        for worker in 0..8 {
            let manager = manager.clone();
            s.spawn(move || {
                let case_id = format!("case-{}", worker);
                let reqs = if worker % 2 == 0 {
                    vec![req("A", 1.0), req("B", 1.0)]
                } else {
                    vec![req("B", 1.0), req("A", 1.0)]
                };
                for _ in 0..500 {
                    if manager.try_acquire_all(&case_id, &reqs).is_ok() {
                        let snap = manager.snapshot();
                        assert!(snap["A"].available >= 0.0);
                        assert!(snap["B"].available >= 0.0);
                        manager.release_all(&case_id, &reqs);
                    }
                }
            });
        }
    });

    assert_consistent(&manager);
    assert_eq!(manager.availability()["A"], 3.0);
    assert_eq!(manager.availability()["B"], 3.0);
}
