use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Profile cache lifetime: 24 hours in milliseconds.
pub const PROFILE_CACHE_TTL_MS: u64 = 86_400_000;

/// Resolution phase of the session state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionPhase {
    /// No attempt has been made to resolve identity yet.
    Uninitialized,
    /// Cache check and bridge probe are in progress.
    Resolving,
    /// No usable token/user pair was found.
    Unauthenticated,
    /// Token/user pair present, profile missing or expired.
    AuthenticatedNoProfile,
    /// Token/user pair present with a matching profile.
    AuthenticatedWithProfile,
}

/// Credential triple shared by the cache, the host bridge and the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    /// Opaque bearer token.
    pub token: String,
    /// Remote user identifier.
    pub user_id: String,
    /// Community the session is scoped to, when known.
    #[serde(default)]
    pub community_id: Option<String>,
}

impl SessionIdentity {
    pub fn new(
        token: impl Into<String>,
        user_id: impl Into<String>,
        community_id: Option<String>,
    ) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            community_id,
        }
    }

    /// Whether both token and user id carry a value.
    pub fn is_usable(&self) -> bool {
        !self.token.trim().is_empty() && !self.user_id.trim().is_empty()
    }
}

/// Resolved human-readable user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub username: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// Read-only view of the session handed to request-issuing consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub community_id: Option<String>,
    pub profile: Option<UserProfile>,
    /// Host bridge was reachable at the last probe.
    pub is_embedded: bool,
    /// Initial resolution still running.
    pub session_loading: bool,
    /// A profile fetch is in flight.
    pub profile_loading: bool,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.user_id.is_some()
    }
}

/// Identifies one profile fetch; completions carrying any other ticket are stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub generation: u64,
    pub token: String,
    pub user_id: String,
}

#[cfg(test)]
impl FetchTicket {
    pub fn matches_pair(&self, token: &str, user_id: &str) -> bool {
        self.token == token && self.user_id == user_id
    }
}

/// Signal that the host bridge finished injecting and should be re-probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeReady;

/// Input accepted by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Persisted cache was read at startup.
    CacheHydrated {
        /// Cached credential triple, when present and well-formed.
        identity: Option<SessionIdentity>,
        /// Cached profile, already filtered for expiry.
        profile: Option<UserProfile>,
    },
    /// Synchronous bridge query, issued at startup or by an explicit refresh.
    BridgeQueried {
        /// Host bridge was reachable.
        embedded: bool,
        /// Credentials reported by the bridge.
        identity: Option<SessionIdentity>,
    },
    /// Bridge query re-run after an asynchronous ready notification.
    BridgeReady {
        /// Host bridge was reachable.
        embedded: bool,
        /// Credentials reported by the bridge.
        identity: Option<SessionIdentity>,
    },
    /// A profile fetch finished (successfully or not).
    ProfileResolved {
        /// Ticket issued when the fetch was started.
        ticket: FetchTicket,
        /// Lookup result.
        outcome: Result<UserProfile, SessionError>,
    },
    /// Explicit session teardown.
    Cleared,
}

/// Side effect requested by a state transition, executed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Write the credential triple to the persisted cache.
    PersistIdentity(SessionIdentity),
    /// Write the profile to the persisted cache with a fresh timestamp.
    PersistProfile(UserProfile),
    /// Start a remote profile lookup for the ticket's pair.
    FetchProfile(FetchTicket),
    /// Cancel the fetch identified by the ticket.
    CancelFetch(FetchTicket),
    /// Report an authentication change to the embedding frame.
    NotifyFrame {
        /// New authentication state.
        is_authenticated: bool,
    },
    /// Ask the host bridge to drop its credentials.
    ClearBridge,
    /// Delete both persisted cache entries.
    ClearPersisted,
}
