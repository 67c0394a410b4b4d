//! In-memory orchestration kernel for workflow cases.
//!
//! An [`Engine`] owns one static [`Workflow`], its resource pools and every
//! case started against it. Executors drive tasks through
//! assign/start/complete/fail; the engine decides readiness, arbitrates
//! resources, applies retry and failure policies and reports SLA alerts.

pub mod dsl;
pub mod error;
pub mod runtime;

pub use dsl::{
    BreachAction, Dependency, DependencyType, FailureAction, JoinType, Priority, Resource,
    ResourceRequirement, SlaPolicy, Task, TaskSla, Workflow,
};
pub use error::{EngineError, EngineResult};
pub use runtime::case::{Case, CaseFilter, CaseStatus, TaskInstance, TaskStatus, Variables};
pub use runtime::clock::{Clock, ManualClock, SystemClock};
pub use runtime::engine::{Engine, EngineConfig};
pub use runtime::hooks::{Condition, ExecutionContext, ExpressionCondition, TaskHook};
pub use runtime::metrics::{Metrics, TaskMetrics};
pub use runtime::resource::PoolSnapshot;
pub use runtime::sla::{Alert, AlertMode, AlertType, Severity};
