use async_trait::async_trait;
use reqwest::{
    StatusCode,
    header::{ACCEPT, RETRY_AFTER},
};
use session_core::{
    SessionError, SessionErrorCategory, UserProfile, classify_http_status, normalize_user_profile,
};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::HttpLookupConfig;

const ERROR_BODY_SNIPPET_CHARS: usize = 200;

/// Remote identity lookup returning the profile for a user id.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn fetch_profile(&self, user_id: &str, token: &str) -> Result<UserProfile, SessionError>;
}

/// [`ProfileLookup`] over the SwitchX REST API.
#[derive(Debug, Clone)]
pub struct HttpProfileLookup {
    client: reqwest::Client,
    config: HttpLookupConfig,
}

impl HttpProfileLookup {
    pub fn new(config: HttpLookupConfig) -> Result<Self, SessionError> {
        if config.base_url.cannot_be_a_base() {
            return Err(SessionError::new(
                SessionErrorCategory::Config,
                "invalid_base_url",
                format!("'{}' cannot be used as an API root", config.base_url),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| {
                SessionError::new(
                    SessionErrorCategory::Config,
                    "http_client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self { client, config })
    }

    /// `{base_url}/users/{user_id}` with the id percent-encoded as one segment.
    pub fn profile_url(&self, user_id: &str) -> Result<Url, SessionError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SessionError::new(
                    SessionErrorCategory::Config,
                    "invalid_base_url",
                    format!("'{}' cannot be used as an API root", self.config.base_url),
                )
            })?
            .pop_if_empty()
            .push("users")
            .push(user_id);
        Ok(url)
    }

    async fn request_once(
        &self,
        url: &Url,
        user_id: &str,
        token: &str,
    ) -> Result<UserProfile, SessionError> {
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let mut err = status_error(status, user_id, &body);
            if let Some(seconds) = retry_after {
                err = err.with_retry_after(Duration::from_secs(seconds));
            }
            return Err(err);
        }

        let body = response.bytes().await.map_err(map_transport_error)?;
        normalize_user_profile(user_id, &body)
    }
}

#[async_trait]
impl ProfileLookup for HttpProfileLookup {
    async fn fetch_profile(&self, user_id: &str, token: &str) -> Result<UserProfile, SessionError> {
        let url = self.profile_url(user_id)?;
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            match self.request_once(&url, user_id, token).await {
                Ok(profile) => {
                    debug!(user_id, attempt, "profile lookup succeeded");
                    return Ok(profile);
                }
                Err(err) if err.is_transient() && policy.allows_retry_after(attempt) => {
                    let delay = policy.delay_for_attempt(attempt, err.retry_after_ms);
                    warn!(
                        user_id,
                        attempt,
                        code = %err.code,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "profile lookup failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn status_error(status: StatusCode, user_id: &str, body: &str) -> SessionError {
    let category = classify_http_status(status.as_u16());
    let code = match category {
        SessionErrorCategory::NotFound => "profile_not_found",
        SessionErrorCategory::Auth => "profile_unauthorized",
        SessionErrorCategory::RateLimited => "profile_rate_limited",
        _ => "profile_http_error",
    };
    let snippet: String = body.trim().chars().take(ERROR_BODY_SNIPPET_CHARS).collect();
    let message = if snippet.is_empty() {
        format!("profile lookup for '{user_id}' failed with {status}")
    } else {
        format!("profile lookup for '{user_id}' failed with {status}: {snippet}")
    };
    SessionError::new(category, code, message)
}

fn map_transport_error(err: reqwest::Error) -> SessionError {
    if err.is_timeout() {
        SessionError::new(
            SessionErrorCategory::Network,
            "profile_request_timeout",
            err.to_string(),
        )
    } else if err.is_decode() {
        SessionError::new(
            SessionErrorCategory::Serialization,
            "profile_body_error",
            err.to_string(),
        )
    } else {
        SessionError::new(
            SessionErrorCategory::Network,
            "profile_transport_error",
            err.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_core::RetryPolicy;
    use std::sync::{Arc, Mutex};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn lookup_for(base: &str, retry: RetryPolicy) -> HttpProfileLookup {
        let base = Url::parse(base).expect("base url parses");
        HttpProfileLookup::new(
            HttpLookupConfig::new(base)
                .with_request_timeout(Duration::from_secs(5))
                .with_retry(retry),
        )
        .expect("client builds")
    }

    /// Serves one canned response per connection and records request heads.
    async fn serve(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut head = Vec::new();
                let mut buf = [0_u8; 1024];
                while !head.windows(4).any(|window| window == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                seen.lock()
                    .expect("request log lock")
                    .push(String::from_utf8_lossy(&head).into_owned());
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/api/v1/"), requests)
    }

    fn http_response(status_line: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn profile_url_appends_escaped_segment() {
        let lookup = lookup_for("https://api.example.com/v1/", RetryPolicy::no_retry());
        assert_eq!(
            lookup.profile_url("user 42").expect("url builds").as_str(),
            "https://api.example.com/v1/users/user%2042"
        );

        let lookup = lookup_for("https://api.example.com", RetryPolicy::no_retry());
        assert_eq!(
            lookup.profile_url("u1").expect("url builds").as_str(),
            "https://api.example.com/users/u1"
        );
    }

    #[test]
    fn rejects_non_hierarchical_base() {
        let base = Url::parse("mailto:ops@example.com").expect("url parses");
        let err = HttpProfileLookup::new(HttpLookupConfig::new(base)).expect_err("must reject");
        assert_eq!(err.code, "invalid_base_url");
    }

    #[test]
    fn status_errors_carry_category_codes() {
        let err = status_error(StatusCode::NOT_FOUND, "u1", "");
        assert_eq!(err.category, SessionErrorCategory::NotFound);
        assert_eq!(err.code, "profile_not_found");

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "u1", "  busy  ");
        assert_eq!(err.category, SessionErrorCategory::Network);
        assert!(err.message.ends_with("busy"));
    }

    #[tokio::test]
    async fn fetch_sends_bearer_and_normalizes_wrapped_user() {
        let body = r#"{"user":{"id":"u1","displayName":"Ada","username":"ada","isBot":false}}"#;
        let (base, requests) = serve(vec![http_response("200 OK", "", body)]).await;
        let lookup = lookup_for(&base, RetryPolicy::no_retry());

        let profile = lookup
            .fetch_profile("u1", "secret-token")
            .await
            .expect("lookup succeeds");
        assert_eq!(profile.user_id, "u1");
        assert_eq!(profile.name, "Ada");

        let requests = requests.lock().expect("request log lock");
        let head = requests.first().expect("one request").to_ascii_lowercase();
        assert!(head.starts_with("get /api/v1/users/u1 "));
        assert!(head.contains("authorization: bearer secret-token"));
    }

    #[tokio::test]
    async fn transient_status_is_retried() {
        let body = r#"{"userId":"u1","name":"Ada","username":"ada"}"#;
        let (base, requests) = serve(vec![
            http_response("503 Service Unavailable", "Retry-After: 0\r\n", "{}"),
            http_response("200 OK", "", body),
        ])
        .await;
        let lookup = lookup_for(&base, RetryPolicy::new(1, 5, 3));

        let profile = lookup.fetch_profile("u1", "tok").await.expect("retry succeeds");
        assert_eq!(profile.username, "ada");
        assert_eq!(requests.lock().expect("request log lock").len(), 2);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let (base, requests) = serve(vec![
            http_response("404 Not Found", "", r#"{"error":"no such user"}"#),
            http_response("200 OK", "", "{}"),
        ])
        .await;
        let lookup = lookup_for(&base, RetryPolicy::new(1, 5, 3));

        let err = lookup
            .fetch_profile("ghost", "tok")
            .await
            .expect_err("lookup fails");
        assert_eq!(err.category, SessionErrorCategory::NotFound);
        assert_eq!(requests.lock().expect("request log lock").len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires SWITCHX_LIVE_API_BASE_URL, SWITCHX_LIVE_TOKEN and SWITCHX_LIVE_USER_ID"]
    async fn live_profile_lookup() {
        let base = std::env::var("SWITCHX_LIVE_API_BASE_URL").expect("base url env");
        let token = std::env::var("SWITCHX_LIVE_TOKEN").expect("token env");
        let user_id = std::env::var("SWITCHX_LIVE_USER_ID").expect("user id env");

        let lookup = lookup_for(&base, RetryPolicy::default());
        let profile = lookup
            .fetch_profile(&user_id, &token)
            .await
            .expect("live lookup succeeds");
        assert_eq!(profile.user_id, user_id);
    }
}
