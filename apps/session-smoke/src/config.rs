//! Environment-backed configuration for `session-smoke`.

use std::{env, error::Error, fmt, path::PathBuf, time::Duration};

use session_core::{RetryPolicy, TargetOrigin};
use session_platform::BridgeAuth;
use session_switchx::{HttpLookupConfig, SyncConfig};
use url::Url;

const DEFAULT_API_BASE_URL: &str = "https://api.switchx.example/v1";
const DEFAULT_DATA_DIR: &str = "./.switchx-session-store";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    pub api_base_url: Url,
    pub target_origin: TargetOrigin,
    /// Root of the file-backed session cache.
    pub data_dir: PathBuf,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Credentials served by the simulated host bridge. `None` runs standalone.
    pub bridge_auth: Option<BridgeAuth>,
    pub bridge_community_id: Option<String>,
    /// Clear the session after printing the resolved snapshot.
    pub clear_after: bool,
    pub settle_timeout_ms: u64,
}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let raw_base_url = optional_trimmed_env("SWITCHX_API_BASE_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned());
        let api_base_url = Url::parse(&raw_base_url).map_err(|err| ConfigError::InvalidValue {
            key: "SWITCHX_API_BASE_URL",
            value: raw_base_url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(api_base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "SWITCHX_API_BASE_URL",
                value: raw_base_url,
                reason: "must use http or https".to_owned(),
            });
        }

        let target_origin = match optional_trimmed_env("SWITCHX_TARGET_ORIGIN", &mut lookup) {
            Some(raw) => TargetOrigin::parse(&raw).map_err(|err| ConfigError::InvalidValue {
                key: "SWITCHX_TARGET_ORIGIN",
                value: raw.clone(),
                reason: err.to_string(),
            })?,
            None => TargetOrigin::Any,
        };

        let data_dir = optional_trimmed_env("SWITCHX_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let request_timeout_ms = parse_optional_u64_with_default(
            "SWITCHX_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SWITCHX_REQUEST_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let retry_base_delay_ms = parse_optional_u64_with_default(
            "SWITCHX_RETRY_BASE_DELAY_MS",
            DEFAULT_RETRY_BASE_DELAY_MS,
            &mut lookup,
        )?;
        let retry_max_attempts = parse_optional_u32_with_default(
            "SWITCHX_RETRY_MAX_ATTEMPTS",
            DEFAULT_RETRY_MAX_ATTEMPTS,
            &mut lookup,
        )?;
        if retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SWITCHX_RETRY_MAX_ATTEMPTS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let bridge_token = optional_trimmed_env("SWITCHX_BRIDGE_TOKEN", &mut lookup);
        let bridge_user_id = optional_trimmed_env("SWITCHX_BRIDGE_USER_ID", &mut lookup);
        let bridge_auth = match (bridge_token, bridge_user_id) {
            (Some(token), Some(user_id)) => Some(BridgeAuth { token, user_id }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    key: "SWITCHX_BRIDGE_USER_ID",
                    value: String::new(),
                    reason: "required when SWITCHX_BRIDGE_TOKEN is set".to_owned(),
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    key: "SWITCHX_BRIDGE_TOKEN",
                    value: String::new(),
                    reason: "required when SWITCHX_BRIDGE_USER_ID is set".to_owned(),
                });
            }
        };
        let bridge_community_id = optional_trimmed_env("SWITCHX_BRIDGE_COMMUNITY_ID", &mut lookup);

        let clear_after = parse_optional_bool("SWITCHX_SMOKE_CLEAR", &mut lookup)?;
        let settle_timeout_ms = parse_optional_u64_with_default(
            "SWITCHX_SMOKE_SETTLE_MS",
            DEFAULT_SETTLE_TIMEOUT_MS,
            &mut lookup,
        )?;

        Ok(Self {
            api_base_url,
            target_origin,
            data_dir,
            request_timeout_ms,
            retry: RetryPolicy::new(
                retry_base_delay_ms,
                DEFAULT_RETRY_MAX_DELAY_MS.max(retry_base_delay_ms),
                retry_max_attempts,
            ),
            bridge_auth,
            bridge_community_id,
            clear_after,
            settle_timeout_ms,
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            target_origin: self.target_origin.clone(),
            ..SyncConfig::default()
        }
    }

    pub fn lookup_config(&self) -> HttpLookupConfig {
        HttpLookupConfig::new(self.api_base_url.clone())
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_retry(self.retry)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u32_with_default<F>(
    key: &'static str,
    default: u32,
    lookup: &mut F,
) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_bool<F>(key: &'static str, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_run_standalone_with_wildcard_origin() {
        let cfg = config_from_pairs(&[]).expect("config should parse");

        assert_eq!(cfg.api_base_url.as_str(), "https://api.switchx.example/v1");
        assert!(cfg.target_origin.is_wildcard());
        assert_eq!(cfg.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(cfg.retry.max_attempts(), DEFAULT_RETRY_MAX_ATTEMPTS);
        assert_eq!(cfg.bridge_auth, None);
        assert!(!cfg.clear_after);
    }

    #[test]
    fn parses_bridge_credentials_and_overrides() {
        let cfg = config_from_pairs(&[
            ("SWITCHX_API_BASE_URL", "http://localhost:8080/api"),
            ("SWITCHX_TARGET_ORIGIN", "https://host.example.com"),
            ("SWITCHX_DATA_DIR", " /tmp/switchx "),
            ("SWITCHX_REQUEST_TIMEOUT_MS", "2500"),
            ("SWITCHX_RETRY_MAX_ATTEMPTS", "1"),
            ("SWITCHX_BRIDGE_TOKEN", "tok"),
            ("SWITCHX_BRIDGE_USER_ID", "user-1"),
            ("SWITCHX_BRIDGE_COMMUNITY_ID", "c-1"),
            ("SWITCHX_SMOKE_CLEAR", "yes"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.target_origin.as_str(), "https://host.example.com");
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/switchx"));
        assert_eq!(
            cfg.bridge_auth,
            Some(BridgeAuth {
                token: "tok".into(),
                user_id: "user-1".into(),
            })
        );
        assert_eq!(cfg.bridge_community_id.as_deref(), Some("c-1"));
        assert!(cfg.clear_after);

        let lookup = cfg.lookup_config();
        assert_eq!(lookup.request_timeout, Duration::from_millis(2_500));
        assert_eq!(lookup.retry.max_attempts(), 1);
        assert_eq!(cfg.sync_config().target_origin, cfg.target_origin);
    }

    #[test]
    fn rejects_half_configured_bridge() {
        let err = config_from_pairs(&[("SWITCHX_BRIDGE_TOKEN", "tok")])
            .expect_err("user id is required");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "SWITCHX_BRIDGE_USER_ID",
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = config_from_pairs(&[("SWITCHX_TARGET_ORIGIN", "https://host.example.com/app")])
            .expect_err("path is not an origin");
        assert!(err.to_string().contains("SWITCHX_TARGET_ORIGIN"));

        let err = config_from_pairs(&[("SWITCHX_REQUEST_TIMEOUT_MS", "soon")])
            .expect_err("timeout must be numeric");
        assert!(err.to_string().contains("SWITCHX_REQUEST_TIMEOUT_MS"));

        let err = config_from_pairs(&[("SWITCHX_API_BASE_URL", "ftp://files.example.com")])
            .expect_err("scheme must be http");
        assert!(err.to_string().contains("http or https"));

        let err = config_from_pairs(&[("SWITCHX_SMOKE_CLEAR", "maybe")])
            .expect_err("clear must be boolean");
        assert!(err.to_string().contains("expected a boolean"));
    }
}
