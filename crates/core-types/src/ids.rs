use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a submitted task. Non-empty by construction.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a ghost context pool slot (`ctx-N`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn slot(index: usize) -> Self {
        Self(format!("ctx-{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fragment marker the host uses for context-to-target matching.
    pub fn fragment_marker(&self) -> String {
        format!("#ghost-context={}", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic lease identifier issued by the pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_rejects_empty() {
        assert!(TaskId::new("").is_none());
        assert!(TaskId::new("t1").is_some());
    }

    #[test]
    fn context_fragment_marker() {
        let ctx = ContextId::slot(3);
        assert_eq!(ctx.as_str(), "ctx-3");
        assert_eq!(ctx.fragment_marker(), "#ghost-context=ctx-3");
    }
}
