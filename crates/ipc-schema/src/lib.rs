//! Ghost-tab ↔ host message schema.
//!
//! A versioned envelope over a local transport. Decoding is strict in
//! one direction only: unknown fields pass through untouched, missing
//! required fields reject the frame with `TASK_ERROR(operation =
//! UNKNOWN)`.

use chrono::{DateTime, Utc};
use ghostpilot_core_types::{ActionKind, Point, StructuredError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

/// Wire operation names, mirrored back in responses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Navigate,
    Screenshot,
    AxTree,
    InjectJs,
    InputEvent,
    Unknown,
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("frame is not valid json: {0}")]
    Malformed(String),
    #[error("frame rejected: {0}")]
    Invalid(String),
}

/// The outer envelope shared by requests and responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub schema_version: u32,
    pub message_id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(message_type: &str, payload: Value) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            message_id: Uuid::new_v4().to_string(),
            message_type: message_type.to_string(),
            task_id: None,
            context_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_context(mut self, context_id: &str) -> Self {
        self.context_id = Some(context_id.to_string());
        self
    }
}

// --- request payloads ---------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatePayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotPayload {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_surface: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scroll_steps: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxTreePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_bounding_boxes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_budget: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectJsPayload {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub await_promise: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_by_value: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEventPayload {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// A decoded inbound request.
#[derive(Clone, Debug)]
pub enum Request {
    Navigate(NavigatePayload),
    Screenshot(ScreenshotPayload),
    AxTree(AxTreePayload),
    InjectJs(InjectJsPayload),
    InputEvent(InputEventPayload),
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Navigate(_) => Operation::Navigate,
            Request::Screenshot(_) => Operation::Screenshot,
            Request::AxTree(_) => Operation::AxTree,
            Request::InjectJs(_) => Operation::InjectJs,
            Request::InputEvent(_) => Operation::InputEvent,
        }
    }
}

/// Decode an inbound frame. Any shape problem maps to the rejection
/// envelope the caller should send back.
pub fn decode_request(frame: &str) -> Result<(Envelope, Request), Box<Envelope>> {
    let envelope: Envelope = match serde_json::from_str(frame) {
        Ok(envelope) => envelope,
        Err(err) => return Err(Box::new(rejection(&err.to_string()))),
    };

    let payload = envelope.payload.clone();
    let request = match envelope.message_type.as_str() {
        "NAVIGATE" => serde_json::from_value(payload).map(Request::Navigate),
        "SCREENSHOT" => serde_json::from_value(payload).map(Request::Screenshot),
        "AX_TREE" => serde_json::from_value(payload).map(Request::AxTree),
        "INJECT_JS" => serde_json::from_value(payload).map(Request::InjectJs),
        "INPUT_EVENT" => serde_json::from_value(payload).map(Request::InputEvent),
        other => {
            return Err(Box::new(rejection(&format!("unknown request type {other}"))));
        }
    };

    match request {
        Ok(request) => Ok((envelope, request)),
        Err(err) => Err(Box::new(rejection(&err.to_string()))),
    }
}

// --- responses ----------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Scheduler,
    Queue,
    State,
}

/// `TASK_RESULT` — operation mirrors the request.
pub fn task_result(operation: Operation, data: Value) -> Envelope {
    Envelope::new(
        "TASK_RESULT",
        serde_json::json!({ "operation": operation, "data": data }),
    )
}

/// `TASK_ERROR` with the structured error payload.
pub fn task_error(operation: Operation, error: &StructuredError) -> Envelope {
    Envelope::new(
        "TASK_ERROR",
        serde_json::json!({ "operation": operation, "error": error }),
    )
}

/// `TASK_STATUS` — one frame of the causal status stream.
pub fn task_status(kind: StatusKind, event: Value) -> Envelope {
    Envelope::new(
        "TASK_STATUS",
        serde_json::json!({ "kind": kind, "event": event }),
    )
}

/// The rejection frame for unparsable input.
fn rejection(message: &str) -> Envelope {
    let error = StructuredError::new(
        ghostpilot_core_types::ErrorKind::Protocol,
        message.to_string(),
    );
    task_error(Operation::Unknown, &error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(message_type: &str, payload: Value) -> String {
        serde_json::to_string(&Envelope::new(message_type, payload).with_task("t1")).unwrap()
    }

    #[test]
    fn navigate_round_trips() {
        let frame = frame("NAVIGATE", json!({ "url": "https://a.test/", "timeoutMs": 5000 }));
        let (envelope, request) = decode_request(&frame).unwrap();
        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        assert_eq!(envelope.task_id.as_deref(), Some("t1"));
        match request {
            Request::Navigate(payload) => {
                assert_eq!(payload.url, "https://a.test/");
                assert_eq!(payload.timeout_ms, Some(5000));
            }
            other => panic!("wrong decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let frame = frame(
            "AX_TREE",
            json!({ "charBudget": 1000, "futureKnob": true, "anotherOne": "x" }),
        );
        let (_, request) = decode_request(&frame).unwrap();
        match request {
            Request::AxTree(payload) => assert_eq!(payload.char_budget, Some(1000)),
            other => panic!("wrong decode: {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_rejects_with_unknown() {
        let frame = frame("NAVIGATE", json!({ "timeoutMs": 5000 }));
        let rejection = decode_request(&frame).unwrap_err();
        assert_eq!(rejection.message_type, "TASK_ERROR");
        assert_eq!(rejection.payload["operation"], "UNKNOWN");
    }

    #[test]
    fn unknown_type_rejects_with_unknown() {
        let frame = frame("TELEPORT", json!({}));
        let rejection = decode_request(&frame).unwrap_err();
        assert_eq!(rejection.payload["operation"], "UNKNOWN");
    }

    #[test]
    fn garbage_rejects_with_unknown() {
        let rejection = decode_request("{not json").unwrap_err();
        assert_eq!(rejection.message_type, "TASK_ERROR");
        assert_eq!(rejection.payload["operation"], "UNKNOWN");
    }

    #[test]
    fn input_event_decodes_action_vocabulary() {
        let frame = frame(
            "INPUT_EVENT",
            json!({
                "action": "CLICK",
                "target": { "x": 10.0, "y": 20.0 },
                "confidence": 0.9,
                "reasoning": "button under cursor"
            }),
        );
        let (_, request) = decode_request(&frame).unwrap();
        match request {
            Request::InputEvent(payload) => {
                assert_eq!(payload.action, ActionKind::Click);
                assert_eq!(payload.target.unwrap().x, 10.0);
            }
            other => panic!("wrong decode: {other:?}"),
        }
    }

    #[test]
    fn task_result_mirrors_operation() {
        let envelope = task_result(Operation::Screenshot, json!({ "width": 1280 }));
        assert_eq!(envelope.message_type, "TASK_RESULT");
        assert_eq!(envelope.payload["operation"], "SCREENSHOT");
        assert_eq!(envelope.payload["data"]["width"], 1280);
    }

    #[test]
    fn status_frames_carry_kind() {
        let envelope = task_status(StatusKind::Queue, json!({ "event": "ENQUEUED" }));
        assert_eq!(envelope.payload["kind"], "QUEUE");
    }
}
