use std::time::Duration;

use session_core::{PROFILE_CACHE_TTL_MS, RetryPolicy, TargetOrigin};
use url::Url;

/// Namespace holding both persisted cache entries.
pub const DEFAULT_CACHE_NAMESPACE: &str = "switchx";
const DEFAULT_READY_BUFFER: usize = 16;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_USER_AGENT: &str = concat!("switchx-session/", env!("CARGO_PKG_VERSION"));

/// Synchronizer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Origin frame messages are addressed to. Defaults to the insecure `*`.
    pub target_origin: TargetOrigin,
    /// Lifetime of the persisted profile cache.
    pub profile_ttl_ms: u64,
    /// Store namespace for the cache entries.
    pub cache_namespace: String,
    /// Capacity of the bridge-ready signal queue.
    pub ready_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_origin: TargetOrigin::Any,
            profile_ttl_ms: PROFILE_CACHE_TTL_MS,
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_owned(),
            ready_buffer: DEFAULT_READY_BUFFER,
        }
    }
}

/// Settings for [`crate::HttpProfileLookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpLookupConfig {
    /// API root, for example `https://api.switchx.example/v1`.
    pub base_url: Url,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl HttpLookupConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_defaults_match_cache_contract() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.profile_ttl_ms, 86_400_000);
        assert_eq!(cfg.cache_namespace, "switchx");
        assert!(cfg.target_origin.is_wildcard());
    }

    #[test]
    fn lookup_builders_override_defaults() {
        let base = Url::parse("https://api.example.com/v1").expect("url parses");
        let cfg = HttpLookupConfig::new(base)
            .with_request_timeout(Duration::from_secs(2))
            .with_retry(RetryPolicy::no_retry());
        assert_eq!(cfg.request_timeout, Duration::from_secs(2));
        assert_eq!(cfg.retry.max_attempts(), 1);
        assert!(cfg.user_agent.starts_with("switchx-session/"));
    }
}
