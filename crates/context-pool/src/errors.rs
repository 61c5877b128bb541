use ghostpilot_browser_control::ControlError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is not initialized")]
    NotInitialized,
    #[error("pool is shutting down; request rejected")]
    ShuttingDown,
    #[error("acquire channel dropped")]
    AcquireDropped,
    #[error("context warm-up failed: {0}")]
    WarmFailed(#[from] ControlError),
    #[error("unknown context {0}")]
    UnknownContext(String),
}
