//! Persisted identity and profile cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use session_core::{SessionError, SessionErrorCategory, SessionIdentity, UserProfile};
use session_platform::{Clock, KeyValueStore, ScopedStore, StoreError};
use tracing::{debug, warn};

pub const AUTH_KEY: &str = "auth";
pub const PROFILE_KEY: &str = "user_profile";

#[derive(Debug, Serialize, Deserialize)]
struct CachedProfile {
    data: UserProfile,
    timestamp: u64,
}

/// Result of reading both cache entries at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheRead {
    pub identity: Option<SessionIdentity>,
    /// Unexpired profile, if any.
    pub profile: Option<UserProfile>,
}

pub struct SessionCache {
    store: ScopedStore<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    profile_ttl_ms: u64,
}

impl SessionCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
        clock: Arc<dyn Clock>,
        profile_ttl_ms: u64,
    ) -> Self {
        Self {
            store: ScopedStore::new(store, namespace),
            clock,
            profile_ttl_ms,
        }
    }

    pub fn read(&self) -> CacheRead {
        CacheRead {
            identity: self.read_identity(),
            profile: self.read_profile(),
        }
    }

    /// Cached credential triple. Unparseable entries are deleted and read as a miss.
    pub fn read_identity(&self) -> Option<SessionIdentity> {
        let raw = self.read_raw(AUTH_KEY)?;
        match serde_json::from_str::<SessionIdentity>(&raw) {
            Ok(identity) => Some(identity),
            Err(err) => {
                warn!(key = AUTH_KEY, error = %err, "discarding malformed cache entry");
                self.discard(AUTH_KEY);
                None
            }
        }
    }

    /// Cached profile if it was written less than the configured TTL ago.
    pub fn read_profile(&self) -> Option<UserProfile> {
        let raw = self.read_raw(PROFILE_KEY)?;
        let cached = match serde_json::from_str::<CachedProfile>(&raw) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(key = PROFILE_KEY, error = %err, "discarding malformed cache entry");
                self.discard(PROFILE_KEY);
                return None;
            }
        };

        let age_ms = self.clock.now_ms().saturating_sub(cached.timestamp);
        if age_ms >= self.profile_ttl_ms {
            debug!(
                age_ms,
                ttl_ms = self.profile_ttl_ms,
                "cached profile expired"
            );
            self.discard(PROFILE_KEY);
            return None;
        }
        Some(cached.data)
    }

    pub fn write_identity(&self, identity: &SessionIdentity) -> Result<(), SessionError> {
        let raw = serde_json::to_string(identity).map_err(|err| {
            SessionError::new(
                SessionErrorCategory::Serialization,
                "cache_serialize_error",
                format!("failed encoding cached identity: {err}"),
            )
        })?;
        self.store.set(AUTH_KEY, &raw).map_err(map_store_error)
    }

    /// Store the profile stamped with the current time.
    pub fn write_profile(&self, profile: &UserProfile) -> Result<(), SessionError> {
        let entry = CachedProfile {
            data: profile.clone(),
            timestamp: self.clock.now_ms(),
        };
        let raw = serde_json::to_string(&entry).map_err(|err| {
            SessionError::new(
                SessionErrorCategory::Serialization,
                "cache_serialize_error",
                format!("failed encoding cached profile: {err}"),
            )
        })?;
        self.store.set(PROFILE_KEY, &raw).map_err(map_store_error)
    }

    /// Delete both entries. Missing entries are not an error.
    pub fn clear(&self) -> Result<(), SessionError> {
        for key in [AUTH_KEY, PROFILE_KEY] {
            match self.store.delete(key) {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(err) => return Err(map_store_error(err)),
            }
        }
        Ok(())
    }

    fn read_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(raw) => Some(raw),
            Err(StoreError::NotFound) => None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed; treating as miss");
                None
            }
        }
    }

    fn discard(&self, key: &str) {
        match self.store.delete(key) {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(err) => warn!(key, error = %err, "failed deleting cache entry"),
        }
    }
}

fn map_store_error(err: StoreError) -> SessionError {
    match err {
        StoreError::NotFound => SessionError::new(
            SessionErrorCategory::Storage,
            "cache_entry_missing",
            "cache entry not found",
        ),
        StoreError::Unavailable(message) => {
            SessionError::new(SessionErrorCategory::Storage, "cache_unavailable", message)
        }
        StoreError::Backend(message) => {
            SessionError::new(SessionErrorCategory::Storage, "cache_backend_error", message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_core::PROFILE_CACHE_TTL_MS;
    use session_platform::{InMemoryStore, ManualClock};

    const T0: u64 = 1_700_000_000_000;

    fn profile() -> UserProfile {
        UserProfile {
            user_id: "user-1".into(),
            name: "Ada".into(),
            image_url: Some("https://cdn.example.com/ada.png".into()),
            username: "ada".into(),
            bio: None,
            bot: false,
        }
    }

    fn cache_at(store: &InMemoryStore, clock: Arc<ManualClock>) -> SessionCache {
        SessionCache::new(
            Arc::new(store.clone()),
            "switchx",
            clock,
            PROFILE_CACHE_TTL_MS,
        )
    }

    #[test]
    fn entries_use_wire_shape() {
        let store = InMemoryStore::default();
        let cache = cache_at(&store, Arc::new(ManualClock::new(T0)));

        cache
            .write_identity(&SessionIdentity::new("tok", "user-1", Some("c-1".into())))
            .expect("identity write");
        cache.write_profile(&profile()).expect("profile write");

        let auth: serde_json::Value =
            serde_json::from_str(&store.get_value("switchx", "auth").expect("auth entry"))
                .expect("auth json");
        assert_eq!(
            auth,
            serde_json::json!({"token": "tok", "userId": "user-1", "communityId": "c-1"})
        );

        let cached: serde_json::Value = serde_json::from_str(
            &store
                .get_value("switchx", "user_profile")
                .expect("profile entry"),
        )
        .expect("profile json");
        assert_eq!(cached["timestamp"], serde_json::json!(T0));
        assert_eq!(cached["data"]["userId"], serde_json::json!("user-1"));
        assert_eq!(
            cached["data"]["imageUrl"],
            serde_json::json!("https://cdn.example.com/ada.png")
        );
    }

    #[test]
    fn profile_just_under_ttl_is_served() {
        let store = InMemoryStore::default();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = cache_at(&store, Arc::clone(&clock));
        cache.write_profile(&profile()).expect("profile write");

        clock.set(T0 + PROFILE_CACHE_TTL_MS - 1);
        assert_eq!(cache.read_profile(), Some(profile()));
    }

    #[test]
    fn profile_past_ttl_is_dropped_and_deleted() {
        let store = InMemoryStore::default();
        let clock = Arc::new(ManualClock::new(T0));
        let cache = cache_at(&store, Arc::clone(&clock));
        cache.write_profile(&profile()).expect("profile write");

        clock.set(T0 + 86_400_001);
        assert_eq!(cache.read_profile(), None);
        assert_eq!(
            store.get_value("switchx", "user_profile"),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn malformed_entries_read_as_miss() {
        let store = InMemoryStore::default();
        store
            .set_value("switchx", "auth", "not json at all")
            .expect("seed auth");
        store
            .set_value("switchx", "user_profile", r#"{"data":42}"#)
            .expect("seed profile");
        let cache = cache_at(&store, Arc::new(ManualClock::new(T0)));

        assert_eq!(cache.read(), CacheRead::default());
        assert!(store.is_empty());
    }

    #[test]
    fn clear_tolerates_missing_entries() {
        let store = InMemoryStore::default();
        let cache = cache_at(&store, Arc::new(ManualClock::new(T0)));
        cache
            .write_identity(&SessionIdentity::new("tok", "user-1", None))
            .expect("identity write");

        cache.clear().expect("first clear");
        cache.clear().expect("second clear");
        assert!(store.is_empty());
    }
}
