use std::collections::{BTreeMap, HashMap};
use parking_lot::{Mutex, MutexGuard};
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};
use crate::dsl::{Resource, ResourceRequirement};
use crate::error::{EngineError, EngineResult};

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub capacity: f64,
    pub available: f64,
    pub reserved: BTreeMap<String, f64>,
}

impl PoolSnapshot {
    pub fn reserved_total(&self) -> f64 {
        self.reserved.values().sum()
    }

    pub fn utilization(&self) -> f64 {
        if self.capacity <= 0.0 {
            return 0.0;
        }
        1.0 - self.available / self.capacity
    }
}

#[derive(Debug)]
struct PoolState {
    capacity: f64,
    available: f64,
    reserved: HashMap<String, f64>,
}

impl PoolState {
    fn reserve(&mut self, case_id: &str, quantity: f64) {
        self.available -= quantity;
        *self.reserved.entry(case_id.to_string()).or_insert(0.0) += quantity;
    }

    /// Returns the quantity actually released.
    fn release(&mut self, case_id: &str, quantity: f64) -> f64 {
        let held = self.reserved.get(case_id).copied().unwrap_or(0.0);
        let released = quantity.min(held);
        let remaining = held - released;
        if remaining <= f64::EPSILON {
            self.reserved.remove(case_id);
        } else {
            self.reserved.insert(case_id.to_string(), remaining);
        }
        self.available += released;
        released
    }
}

/// One declared resource with its own lock.
#[derive(Debug)]
pub struct ResourcePool {
    id: String,
    state: Mutex<PoolState>,
}

impl ResourcePool {
    pub fn new(id: &str, capacity: f64) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(PoolState {
                capacity,
                available: capacity,
                reserved: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn available(&self) -> f64 {
        self.state.lock().available
    }

    pub fn try_acquire(&self, case_id: &str, quantity: f64) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.available < quantity {
            return Err(EngineError::ResourceUnavailable {
                resource_id: self.id.clone(),
                requested: quantity,
                available: state.available,
            });
        }
        state.reserve(case_id, quantity);
        Ok(())
    }

    /// Never releases more than the case holds, so the pool total stays intact.
    pub fn release(&self, case_id: &str, quantity: f64) {
        let released = self.state.lock().release(case_id, quantity);
        if released < quantity {
            warn!(resource_id = %self.id, case_id, requested = quantity, released, "Release exceeds reservation");
        }
    }

    /// Grows the pool; there is no ceiling besides what has been produced.
    pub fn produce(&self, quantity: f64) {
        let mut state = self.state.lock();
        state.capacity += quantity;
        state.available += quantity;
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        PoolSnapshot {
            capacity: state.capacity,
            available: state.available,
            reserved: state.reserved.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }
}

/// All pools of one workflow.
#[derive(Debug, Default)]
pub struct ResourceManager {
    pools: BTreeMap<String, ResourcePool>,
}

impl ResourceManager {
    pub fn new(resources: &[Resource]) -> EngineResult<Self> {
        let mut pools = BTreeMap::new();
        for resource in resources {
            let pool = ResourcePool::new(&resource.id, resource.capacity);
            if pools.insert(resource.id.clone(), pool).is_some() {
                return Err(EngineError::PolicyViolation(format!(
                    "duplicate resource id: {}",
                    resource.id
                )));
            }
        }
        Ok(Self { pools })
    }

    pub fn pool(&self, resource_id: &str) -> Option<&ResourcePool> {
        self.pools.get(resource_id)
    }

    pub fn ensure_declared(&self, requirements: &[ResourceRequirement]) -> EngineResult<()> {
        for req in requirements {
            if !self.pools.contains_key(&req.resource_id) {
                return Err(EngineError::PolicyViolation(format!(
                    "undeclared resource: {}",
                    req.resource_id
                )));
            }
        }
        Ok(())
    }

    /// All-or-nothing reservation of a task's full requirement list.
    ///
    /// Pools are locked in ascending id order and held while every quantity is
    /// checked, so no other acquisition can interleave between check and reserve.
    pub fn try_acquire_all(&self, case_id: &str, requirements: &[ResourceRequirement]) -> EngineResult<()> {
        if requirements.is_empty() {
            return Ok(());
        }
        self.ensure_declared(requirements)?;

        let mut wanted: BTreeMap<&str, f64> = BTreeMap::new();
        for req in requirements {
            *wanted.entry(req.resource_id.as_str()).or_insert(0.0) += req.quantity;
        }

        let mut guards = Vec::with_capacity(wanted.len());
        for (resource_id, quantity) in &wanted {
            let pool = &self.pools[*resource_id];
            let guard = pool.lock();
            if guard.available < *quantity {
                return Err(EngineError::ResourceUnavailable {
                    resource_id: resource_id.to_string(),
                    requested: *quantity,
                    available: guard.available,
                });
            }
            guards.push((guard, *quantity));
        }

        for (guard, quantity) in guards.iter_mut() {
            guard.reserve(case_id, *quantity);
        }
        debug!(case_id, resources = wanted.len(), "Resources acquired");
        Ok(())
    }

    pub fn release_all(&self, case_id: &str, requirements: &[ResourceRequirement]) {
        for req in requirements {
            if let Some(pool) = self.pools.get(&req.resource_id) {
                pool.release(case_id, req.quantity);
            }
        }
    }

    pub fn produce_all(&self, produced: &[ResourceRequirement]) -> EngineResult<()> {
        self.ensure_declared(produced)?;
        for req in produced {
            self.pools[&req.resource_id].produce(req.quantity);
        }
        Ok(())
    }

    pub fn availability(&self) -> BTreeMap<String, f64> {
        self.pools.iter().map(|(id, pool)| (id.clone(), pool.available())).collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, PoolSnapshot> {
        self.pools.iter().map(|(id, pool)| (id.clone(), pool.snapshot())).collect()
    }
}
