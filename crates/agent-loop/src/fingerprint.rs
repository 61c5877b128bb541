//! Anti-repeat action fingerprints.

use std::collections::VecDeque;

use ghostpilot_core_types::{Action, ActionKind};

/// Quantization grid for click targets. The source material quantizes
/// without naming a constant; 8 px folds jitter while keeping distinct
/// controls distinct.
pub const FINGERPRINT_GRID_PX: f64 = 8.0;

/// How many recent no-progress fingerprints are held against new
/// decisions.
pub const NO_PROGRESS_WINDOW: usize = 5;

/// A fingerprint seen more than this many times inside one
/// no-progress streak forces the run to FAILED.
pub const MAX_FINGERPRINT_REPEATS: u32 = 2;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ActionFingerprint {
    kind: ActionKind,
    grid_x: Option<i64>,
    grid_y: Option<i64>,
    payload: String,
}

impl ActionFingerprint {
    pub fn of(action: &Action) -> Self {
        let (grid_x, grid_y) = match action {
            Action::Click { target } => (
                Some((target.x / FINGERPRINT_GRID_PX).round() as i64),
                Some((target.y / FINGERPRINT_GRID_PX).round() as i64),
            ),
            _ => (None, None),
        };
        let payload = match action {
            Action::Type { text } => normalize(text),
            Action::PressKey { key } => normalize(key),
            Action::Scroll { pixels } => pixels.to_string(),
            Action::Extract { expression } => normalize(expression),
            _ => String::new(),
        };
        Self {
            kind: action.kind(),
            grid_x,
            grid_y,
            payload,
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Sliding window of fingerprints that produced no progress.
#[derive(Default)]
pub struct RepeatTracker {
    window: VecDeque<ActionFingerprint>,
}

impl RepeatTracker {
    /// Record a no-progress action.
    pub fn record(&mut self, fingerprint: ActionFingerprint) {
        if self.window.len() == NO_PROGRESS_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(fingerprint);
    }

    /// Does the candidate collide with a recent no-progress action?
    pub fn collides(&self, fingerprint: &ActionFingerprint) -> bool {
        self.window.contains(fingerprint)
    }

    /// Times the candidate already appears in the window.
    pub fn repeats(&self, fingerprint: &ActionFingerprint) -> u32 {
        self.window.iter().filter(|f| *f == fingerprint).count() as u32
    }

    /// Progress clears the held grudges.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostpilot_core_types::Point;

    #[test]
    fn jittered_clicks_share_a_fingerprint() {
        let a = ActionFingerprint::of(&Action::Click {
            target: Point { x: 100.0, y: 200.0 },
        });
        let b = ActionFingerprint::of(&Action::Click {
            target: Point { x: 103.0, y: 198.0 },
        });
        assert_eq!(a, b);
    }

    #[test]
    fn distant_clicks_differ() {
        let a = ActionFingerprint::of(&Action::Click {
            target: Point { x: 100.0, y: 200.0 },
        });
        let b = ActionFingerprint::of(&Action::Click {
            target: Point { x: 300.0, y: 200.0 },
        });
        assert_ne!(a, b);
    }

    #[test]
    fn text_normalizes_case_and_space() {
        let a = ActionFingerprint::of(&Action::Type {
            text: "  Mechanical Keyboards ".into(),
        });
        let b = ActionFingerprint::of(&Action::Type {
            text: "mechanical keyboards".into(),
        });
        assert_eq!(a, b);
    }

    #[test]
    fn tracker_window_slides() {
        let mut tracker = RepeatTracker::default();
        let fp = ActionFingerprint::of(&Action::PressKey { key: "Enter".into() });
        tracker.record(fp.clone());
        tracker.record(fp.clone());
        assert!(tracker.collides(&fp));
        assert_eq!(tracker.repeats(&fp), 2);

        tracker.reset();
        assert!(!tracker.collides(&fp));
    }
}
