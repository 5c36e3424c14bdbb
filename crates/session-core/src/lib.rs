//! Core session contract shared by the synchronizer runtime and its consumers.
//!
//! This crate defines the snapshot/profile model, the reducer-style session
//! state machine, frame messages, retry and payload normalization helpers, and
//! the common error/channel abstractions. It performs no I/O.

/// Snapshot fan-out and bridge-ready intake channels.
pub mod channel;
/// Stable session error types and HTTP classification helpers.
pub mod error;
/// Outbound embedding-frame message and target origin validation.
pub mod frame;
/// Remote user payload reshaping.
pub mod normalization;
/// Backoff policy used by lookup retry loops.
pub mod retry;
/// Session resolution state machine.
pub mod state_machine;
/// Snapshot, identity, profile, event and effect types.
pub mod types;

pub use channel::{SessionChannels, SnapshotStream};
pub use error::{SessionError, SessionErrorCategory, classify_http_status};
pub use frame::{AUTH_CHANGED_MESSAGE_TYPE, FrameMessage, OriginError, TargetOrigin};
pub use normalization::normalize_user_profile;
pub use retry::RetryPolicy;
pub use state_machine::SessionStateMachine;
pub use types::{
    BridgeReady, FetchTicket, PROFILE_CACHE_TTL_MS, SessionEffect, SessionEvent, SessionIdentity,
    SessionPhase, SessionSnapshot, UserProfile,
};
