pub mod clock;
pub mod case;
pub mod resource;
pub mod hooks;
pub mod readiness;
pub mod sla;
pub mod metrics;
pub mod observer;
pub mod engine;
