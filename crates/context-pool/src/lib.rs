//! Ghost-context pool.
//!
//! A fixed set of slots, each bound to one isolated browser context.
//! `min` slots are kept warm; acquisition hands out leases, foreground
//! requests jump every queued background request, and crashed contexts
//! are recycled cold and re-warmed off the caller's path.

pub mod errors;
pub mod events;
pub mod metrics;
pub mod model;
pub mod pool;

pub use errors::PoolError;
pub use events::{PoolEvent, PoolEventKind};
pub use model::{AcquireRequest, Lease, PoolConfig, PoolSnapshot, PoolTelemetry, SlotState};
pub use pool::GhostContextPool;
