//! SwitchX session synchronizer.
//!
//! Reconciles the authenticated identity of an embedded (or standalone)
//! session from three inputs: the persisted cache, the host bridge, and
//! asynchronous bridge-ready signals. Consumers read one [`SessionSnapshot`]
//! through [`SessionSynchronizer::snapshot`] or a watch stream.
//!
//! [`SessionSnapshot`]: session_core::SessionSnapshot

/// Persisted identity and profile cache.
pub mod cache;
/// Synchronizer and HTTP lookup configuration.
pub mod config;
/// Profile lookup trait and its HTTP implementation.
pub mod lookup;
/// Embedding-frame notifier.
pub mod notifier;
/// Session runtime.
pub mod synchronizer;

pub use cache::{AUTH_KEY, CacheRead, PROFILE_KEY, SessionCache};
pub use config::{DEFAULT_CACHE_NAMESPACE, HttpLookupConfig, SyncConfig};
pub use lookup::{HttpProfileLookup, ProfileLookup};
pub use notifier::FrameNotifier;
pub use synchronizer::{SessionDeps, SessionSynchronizer};
