use ghostpilot_core_types::{ErrorKind, NetworkErrorType, StructuredError};
use thiserror::Error;

/// Typed failures surfaced by every session operation.
///
/// Non-crash variants leave the session usable; `TargetClosed` and
/// `RendererCrash` invalidate it and must reach the pool so the slot
/// can be recycled.
#[derive(Clone, Debug, Error)]
pub enum ControlError {
    #[error("navigation failed ({error_type:?}): {message}")]
    Network {
        error_type: NetworkErrorType,
        status: Option<u16>,
        url: Option<String>,
        message: String,
    },
    #[error("in-page evaluation fault: {0}")]
    Runtime(String),
    #[error("operation deadline exceeded: {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    Protocol(String),
    #[error("target closed: {0}")]
    TargetClosed(String),
    #[error("renderer crashed: {0}")]
    RendererCrash(String),
}

impl ControlError {
    pub fn network(error_type: NetworkErrorType, message: impl Into<String>) -> Self {
        Self::Network {
            error_type,
            status: None,
            url: None,
            message: message.into(),
        }
    }

    pub fn network_with_status(
        error_type: NetworkErrorType,
        status: u16,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Network {
            error_type,
            status: Some(status),
            url: Some(url.into()),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Runtime(_) => ErrorKind::Runtime,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::TargetClosed(_) => ErrorKind::TargetClosed,
            Self::RendererCrash(_) => ErrorKind::RendererCrash,
        }
    }

    pub fn is_crash(&self) -> bool {
        self.kind().is_crash()
    }

    pub fn retryable(&self) -> bool {
        match self {
            Self::Network { error_type, .. } => error_type.retryable(),
            Self::Timeout(_) => true,
            Self::Runtime(_) | Self::Protocol(_) => false,
            Self::TargetClosed(_) | Self::RendererCrash(_) => false,
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        match self {
            Self::Network {
                error_type,
                status,
                url,
                message,
            } => {
                let mut err = StructuredError::network(*error_type, message.clone());
                err.status = *status;
                err.url = url.clone();
                err
            }
            other => {
                StructuredError::new(other.kind(), other.to_string()).retryable(other.retryable())
            }
        }
    }
}
