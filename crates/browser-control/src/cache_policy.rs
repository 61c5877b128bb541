//! HTTP-cache policy per ghost context.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::ControlError;

/// How the context treats cached responses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpCachePolicy {
    /// Normal header-driven freshness.
    #[default]
    RespectHeaders,
    /// Bypass the cache on every load.
    ForceRefresh,
    /// Responses count as fresh for `ttl_ms` after arrival, headers
    /// notwithstanding.
    OverrideTtl { ttl_ms: u64 },
}

impl HttpCachePolicy {
    /// OVERRIDE_TTL without a ttl is a caller error.
    pub fn validate(self) -> Result<Self, ControlError> {
        if let HttpCachePolicy::OverrideTtl { ttl_ms } = self {
            if ttl_ms == 0 {
                return Err(ControlError::Protocol(
                    "OVERRIDE_TTL requires a non-zero ttl_ms".into(),
                ));
            }
        }
        Ok(self)
    }
}

/// Freshness bookkeeping backing the OVERRIDE_TTL mode.
#[derive(Default)]
pub struct CachePolicyState {
    policy: RwLock<HttpCachePolicy>,
    arrivals: RwLock<HashMap<String, Instant>>,
}

impl CachePolicyState {
    pub fn policy(&self) -> HttpCachePolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: HttpCachePolicy) -> Result<(), ControlError> {
        *self.policy.write() = policy.validate()?;
        if policy == HttpCachePolicy::ForceRefresh {
            self.arrivals.write().clear();
        }
        Ok(())
    }

    /// Record a main-document arrival for TTL accounting.
    pub fn record_arrival(&self, url: &str) {
        if matches!(self.policy(), HttpCachePolicy::OverrideTtl { .. }) {
            self.arrivals.write().insert(url.to_string(), Instant::now());
        }
    }

    /// Should the next load of `url` bypass the browser cache?
    pub fn bypass_cache(&self, url: &str) -> bool {
        match self.policy() {
            HttpCachePolicy::RespectHeaders => false,
            HttpCachePolicy::ForceRefresh => true,
            HttpCachePolicy::OverrideTtl { ttl_ms } => {
                let arrivals = self.arrivals.read();
                match arrivals.get(url) {
                    Some(arrived) => arrived.elapsed() > Duration::from_millis(ttl_ms),
                    None => false,
                }
            }
        }
    }
}
