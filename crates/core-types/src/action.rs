//! The tagged action model returned by the decision engine.
//!
//! Decisions arrive over the wire as a loose `{action, target?, text?,
//! key?, confidence, reasoning}` record; [`RawDecision::parse`] validates
//! it into the [`Action`] sum so downstream code never sees a CLICK
//! without a target or a WAIT without a duration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Viewport coordinates for pointer actions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Wire-level action discriminant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Click,
    Type,
    PressKey,
    Scroll,
    Wait,
    Extract,
    Done,
    Failed,
}

/// Upper bound applied to WAIT durations at parse time.
pub const MAX_WAIT_MS: u64 = 30_000;

/// Validated action variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Click { target: Point },
    Type { text: String },
    PressKey { key: String },
    Scroll { pixels: i64 },
    Wait { ms: u64 },
    Extract { expression: String },
    Done { text: String },
    Failed { reason: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::PressKey { .. } => ActionKind::PressKey,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::Wait { .. } => ActionKind::Wait,
            Action::Extract { .. } => ActionKind::Extract,
            Action::Done { .. } => ActionKind::Done,
            Action::Failed { .. } => ActionKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Done { .. } | Action::Failed { .. })
    }
}

/// Unvalidated decision as produced by the engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawDecision {
    pub action: Option<ActionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Why a raw decision failed validation. Unsafe decisions escalate to the
/// vision tier rather than aborting the task.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DecisionParseError {
    #[error("decision carries no action")]
    MissingAction,
    #[error("CLICK requires a target")]
    ClickWithoutTarget,
    #[error("TYPE requires text")]
    TypeWithoutText,
    #[error("TYPE text embeds a newline, which would submit")]
    TypeEmbedsSubmit,
    #[error("PRESS_KEY requires a key name")]
    KeyWithoutName,
    #[error("SCROLL text is not a pixel count: {0}")]
    BadScrollAmount(String),
    #[error("WAIT text is not a millisecond count: {0}")]
    BadWaitDuration(String),
    #[error("EXTRACT requires an expression")]
    ExtractWithoutExpression,
    #[error("EXTRACT expression would navigate")]
    ExtractNavigates,
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

impl RawDecision {
    /// Validate into the tagged sum, applying the safety policy.
    pub fn parse(&self) -> Result<Action, DecisionParseError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DecisionParseError::ConfidenceOutOfRange(self.confidence));
        }
        let kind = self.action.ok_or(DecisionParseError::MissingAction)?;
        match kind {
            ActionKind::Click => {
                let target = self.target.ok_or(DecisionParseError::ClickWithoutTarget)?;
                Ok(Action::Click { target })
            }
            ActionKind::Type => {
                let text = self
                    .text
                    .clone()
                    .filter(|t| !t.is_empty())
                    .ok_or(DecisionParseError::TypeWithoutText)?;
                if text.contains('\n') {
                    return Err(DecisionParseError::TypeEmbedsSubmit);
                }
                Ok(Action::Type { text })
            }
            ActionKind::PressKey => {
                let key = self
                    .key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or(DecisionParseError::KeyWithoutName)?;
                Ok(Action::PressKey { key })
            }
            ActionKind::Scroll => {
                let text = self.text.clone().unwrap_or_default();
                let pixels = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| DecisionParseError::BadScrollAmount(text))?;
                Ok(Action::Scroll { pixels })
            }
            ActionKind::Wait => {
                let text = self.text.clone().unwrap_or_default();
                let ms = text
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| DecisionParseError::BadWaitDuration(text))?;
                Ok(Action::Wait {
                    ms: ms.min(MAX_WAIT_MS),
                })
            }
            ActionKind::Extract => {
                let expression = self
                    .text
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(DecisionParseError::ExtractWithoutExpression)?;
                if expression_navigates(&expression) {
                    return Err(DecisionParseError::ExtractNavigates);
                }
                Ok(Action::Extract { expression })
            }
            ActionKind::Done => Ok(Action::Done {
                text: self.text.clone().unwrap_or_default(),
            }),
            ActionKind::Failed => Ok(Action::Failed {
                reason: self.text.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Reject extraction expressions that would change the main frame.
fn expression_navigates(expression: &str) -> bool {
    const NAVIGATING: [&str; 5] = [
        "location.href =",
        "location.href=",
        "location.assign",
        "location.replace",
        "window.open",
    ];
    let lowered = expression.to_ascii_lowercase();
    NAVIGATING.iter().any(|needle| lowered.contains(needle))
        || lowered.trim_start().starts_with("document.location")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: ActionKind) -> RawDecision {
        RawDecision {
            action: Some(kind),
            confidence: 0.9,
            ..Default::default()
        }
    }

    #[test]
    fn click_requires_target() {
        let decision = raw(ActionKind::Click);
        assert_eq!(
            decision.parse().unwrap_err(),
            DecisionParseError::ClickWithoutTarget
        );

        let mut with_target = raw(ActionKind::Click);
        with_target.target = Some(Point { x: 10.0, y: 20.0 });
        assert!(matches!(
            with_target.parse().unwrap(),
            Action::Click { target } if target.x == 10.0
        ));
    }

    #[test]
    fn type_with_newline_is_unsafe() {
        let mut decision = raw(ActionKind::Type);
        decision.text = Some("query\n".into());
        assert_eq!(
            decision.parse().unwrap_err(),
            DecisionParseError::TypeEmbedsSubmit
        );
    }

    #[test]
    fn scroll_parses_signed_pixels() {
        let mut decision = raw(ActionKind::Scroll);
        decision.text = Some("-400".into());
        assert_eq!(decision.parse().unwrap(), Action::Scroll { pixels: -400 });
    }

    #[test]
    fn wait_is_capped() {
        let mut decision = raw(ActionKind::Wait);
        decision.text = Some("999999".into());
        assert_eq!(decision.parse().unwrap(), Action::Wait { ms: MAX_WAIT_MS });
    }

    #[test]
    fn extract_rejects_navigation() {
        let mut decision = raw(ActionKind::Extract);
        decision.text = Some("window.open('https://x.test')".into());
        assert_eq!(
            decision.parse().unwrap_err(),
            DecisionParseError::ExtractNavigates
        );
    }

    #[test]
    fn confidence_is_bounded() {
        let mut decision = raw(ActionKind::Done);
        decision.confidence = 1.2;
        assert!(matches!(
            decision.parse().unwrap_err(),
            DecisionParseError::ConfidenceOutOfRange(_)
        ));
    }

    #[test]
    fn action_round_trips_through_serde() {
        let action = Action::PressKey { key: "Enter".into() };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("PRESS_KEY"));
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
