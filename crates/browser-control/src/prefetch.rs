//! Best-effort cache and connection warming.

use serde_json::json;
use tracing::debug;
use url::Url;

use crate::errors::ControlError;
use crate::model::{PrefetchOutcome, PrefetchStatus};
use crate::session::GhostSession;

impl GhostSession {
    /// Fetch `url` in the page context without touching the main frame.
    /// The response lands in this context's HTTP cache and keeps its
    /// connection warm for the navigation that usually follows.
    pub async fn prefetch(&self, url: &str) -> Result<PrefetchOutcome, ControlError> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(_) => {
                return Ok(PrefetchOutcome {
                    status: PrefetchStatus::Skipped,
                    normalized_url: url.to_string(),
                })
            }
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return Ok(PrefetchOutcome {
                status: PrefetchStatus::Skipped,
                normalized_url: parsed.to_string(),
            });
        }

        let normalized = parsed.to_string();
        let expression = format!(
            "fetch({}, {{ mode: 'no-cors', credentials: 'include' }}).then(() => true)",
            json!(normalized)
        );
        let status = match self.evaluate(&expression, true).await {
            Ok(_) => PrefetchStatus::Prefetched,
            Err(err) => {
                debug!(target: "ghost-session", %err, url = %normalized, "prefetch failed");
                PrefetchStatus::Failed
            }
        };

        Ok(PrefetchOutcome {
            status,
            normalized_url: normalized,
        })
    }
}
