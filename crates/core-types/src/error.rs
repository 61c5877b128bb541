//! Structured error taxonomy shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error categories surfaced by the browser control layer and routed
/// through the perception-action loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    Runtime,
    Timeout,
    Protocol,
    TargetClosed,
    RendererCrash,
}

impl ErrorKind {
    /// Crash kinds invalidate the session and force a pool recycle.
    pub fn is_crash(self) -> bool {
        matches!(self, ErrorKind::TargetClosed | ErrorKind::RendererCrash)
    }
}

/// Navigation-level network failure classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkErrorType {
    DnsFailure,
    Http4xx,
    Http5xx,
    Timeout,
    ConnectionReset,
}

impl NetworkErrorType {
    /// Default retry policy: 4xx is the only non-retryable class.
    pub fn retryable(self) -> bool {
        !matches!(self, NetworkErrorType::Http4xx)
    }

    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(NetworkErrorType::Http4xx),
            500..=599 => Some(NetworkErrorType::Http5xx),
            _ => None,
        }
    }
}

/// Which phase of a step produced the error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSource {
    Navigation,
    Perception,
    Action,
}

/// The error record attached to terminal outcomes, status events, and
/// structured error observations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<NetworkErrorType>,
    pub retryable: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(kind, ErrorKind::Timeout);
        Self {
            kind,
            status: None,
            error_type: None,
            retryable,
            message: message.into(),
            url: None,
            step: None,
        }
    }

    pub fn network(error_type: NetworkErrorType, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Network,
            status: None,
            error_type: Some(error_type),
            retryable: error_type.retryable(),
            message: message.into(),
            url: None,
            step: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_crash(&self) -> bool {
        self.kind.is_crash()
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(url) = &self.url {
            write!(f, " at {url}")?;
        }
        Ok(())
    }
}

impl std::error::Error for StructuredError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_4xx_is_not_retryable() {
        let err = StructuredError::network(NetworkErrorType::Http4xx, "not found").with_status(404);
        assert!(!err.retryable);
        assert_eq!(err.status, Some(404));
    }

    #[test]
    fn dns_and_5xx_and_reset_retry() {
        for error_type in [
            NetworkErrorType::DnsFailure,
            NetworkErrorType::Http5xx,
            NetworkErrorType::Timeout,
            NetworkErrorType::ConnectionReset,
        ] {
            assert!(StructuredError::network(error_type, "x").retryable);
        }
    }

    #[test]
    fn crash_kinds_flagged() {
        assert!(ErrorKind::TargetClosed.is_crash());
        assert!(ErrorKind::RendererCrash.is_crash());
        assert!(!ErrorKind::Network.is_crash());
    }

    #[test]
    fn status_classifies() {
        assert_eq!(
            NetworkErrorType::from_status(502),
            Some(NetworkErrorType::Http5xx)
        );
        assert_eq!(
            NetworkErrorType::from_status(404),
            Some(NetworkErrorType::Http4xx)
        );
        assert_eq!(NetworkErrorType::from_status(200), None);
    }

    #[test]
    fn serializes_kind_under_type_key() {
        let err = StructuredError::new(ErrorKind::Protocol, "framing");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "PROTOCOL");
    }
}
