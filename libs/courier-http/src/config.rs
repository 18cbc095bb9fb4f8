use crate::wire::CachePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of recovery attempts per request
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 1;

/// Initial values for new requests.
///
/// Passed explicitly to [`RequestParts::new`](crate::RequestParts::new); there
/// is no process-wide default.
///
/// ```json
/// { "timeout": "30s", "cache_policy": "reload_ignoring_cache_data", "max_recovery_attempts": 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestDefaults {
    /// Per-attempt timeout (default: 60s)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    pub cache_policy: CachePolicy,

    /// Recovery budget; `None` means unbounded (default: 1)
    pub max_recovery_attempts: Option<u32>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cache_policy: CachePolicy::default(),
            max_recovery_attempts: Some(DEFAULT_MAX_RECOVERY_ATTEMPTS),
        }
    }
}

impl RequestDefaults {
    /// Short timeout and a single recovery, for tests
    #[must_use]
    pub fn fast() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            cache_policy: CachePolicy::ReloadIgnoringCacheData,
            max_recovery_attempts: Some(1),
        }
    }

    /// Default timeout with no recovery limit
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_recovery_attempts: None,
            ..Self::default()
        }
    }
}
