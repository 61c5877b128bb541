//! Page perception: accessibility-tree normalization, the interactive
//! element index, deficiency signals, prompt encoding, and the
//! per-task observation cache.

pub mod cache;
pub mod deficiency;
pub mod encode;
pub mod model;
pub mod normalize;

pub use cache::{CacheMetrics, CachedDecision, CachedPerception, ObservationCache};
pub use deficiency::{classify_deficiency, DeficiencySignals};
pub use encode::{encode_columnar, estimate_prompt_tokens};
pub use model::{
    AxExtraction, AxNode, AxRawNode, BoundingBox, DomCandidate, IndexExtraction,
    InteractiveElement, InteractiveRole, Observation, ScreenshotData, ScreenshotMode,
};
pub use normalize::{build_interactive_index, normalize_tree, NormalizeBudget};
