//! Browser control layer.
//!
//! One [`GhostSession`] per ghost-context browser target, reached over
//! the Chrome DevTools Protocol. The session exposes the typed
//! operations the perception-action loop drives: navigation with commit
//! detection, AX-tree and interactive-index extraction, screenshots,
//! action execution with settle detection, request-interception and
//! HTTP-cache policy, prefetch, network tracing, and crash observation.

pub mod ax;
pub mod cache_policy;
pub mod config;
pub mod crash;
pub mod discovery;
pub mod errors;
pub mod interception;
pub mod metrics;
pub mod model;
pub mod prefetch;
pub mod screenshot;
pub mod session;
pub mod testing;
pub mod trace;
pub mod transport;

pub use cache_policy::HttpCachePolicy;
pub use config::ControlConfig;
pub use crash::{CrashEvent, CrashSource};
pub use errors::ControlError;
pub use interception::{InterceptionMode, InterceptionMetrics};
pub use model::{
    ExecutionResult, ExecutionStatus, MutationSummary, PrefetchOutcome, PrefetchStatus,
    ScreenshotRequest,
};
pub use session::GhostSession;
pub use trace::{NetworkTrace, TraceEntry};
pub use transport::{CdpTransport, CommandTarget, TransportEvent};
