//! Network connection tracing.
//!
//! While a trace is armed, the event pump feeds request/response events
//! into the collector; `unique_connection_ids` is how the isolation
//! tests prove two contexts never share a TCP socket.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEntry {
    pub request_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<i64>,
    pub phase: TracePhase,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    RequestSent,
    ResponseReceived,
    Failed,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkTrace {
    pub entries: Vec<TraceEntry>,
    pub unique_connection_ids: Vec<i64>,
}

#[derive(Default)]
pub struct TraceCollector {
    armed: AtomicBool,
    entries: Mutex<Vec<TraceEntry>>,
}

impl TraceCollector {
    pub fn arm(&self) {
        self.entries.lock().clear();
        self.armed.store(true, Ordering::Relaxed);
    }

    pub fn record(&self, entry: TraceEntry) {
        if self.armed.load(Ordering::Relaxed) {
            self.entries.lock().push(entry);
        }
    }

    pub fn disarm(&self) -> NetworkTrace {
        self.armed.store(false, Ordering::Relaxed);
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut ids: Vec<i64> = entries.iter().filter_map(|e| e.connection_id).collect();
        ids.sort_unstable();
        ids.dedup();
        NetworkTrace {
            entries,
            unique_connection_ids: ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, conn: Option<i64>) -> TraceEntry {
        TraceEntry {
            request_id: id.into(),
            url: "https://a.test/".into(),
            connection_id: conn,
            phase: TracePhase::ResponseReceived,
        }
    }

    #[test]
    fn collects_only_while_armed() {
        let collector = TraceCollector::default();
        collector.record(entry("r0", Some(1)));
        collector.arm();
        collector.record(entry("r1", Some(7)));
        collector.record(entry("r2", Some(7)));
        collector.record(entry("r3", Some(9)));
        let trace = collector.disarm();
        assert_eq!(trace.entries.len(), 3);
        assert_eq!(trace.unique_connection_ids, vec![7, 9]);

        collector.record(entry("r4", Some(11)));
        assert!(collector.disarm().entries.is_empty());
    }
}
