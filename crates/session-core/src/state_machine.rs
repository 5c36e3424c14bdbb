use tracing::{debug, trace, warn};

use crate::{
    error::SessionError,
    types::{
        FetchTicket, SessionEffect, SessionEvent, SessionIdentity, SessionPhase, SessionSnapshot,
        UserProfile,
    },
};

/// Reducer owning the session snapshot.
///
/// Every mutation goes through [`SessionStateMachine::apply`]; side effects are
/// returned to the caller instead of being performed here.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    snapshot: SessionSnapshot,
    in_flight: Option<FetchTicket>,
    next_generation: u64,
    announced: bool,
    /// Set by a clear and reset by the next transition out of `Uninitialized`.
    torn_down: bool,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            snapshot: SessionSnapshot::default(),
            in_flight: None,
            next_generation: 1,
            announced: false,
            torn_down: false,
        }
    }
}

impl SessionStateMachine {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Ticket of the profile fetch currently allowed to update the snapshot.
    pub fn in_flight(&self) -> Option<&FetchTicket> {
        self.in_flight.as_ref()
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<Vec<SessionEffect>, SessionError> {
        match event {
            SessionEvent::CacheHydrated { identity, profile } => {
                self.on_cache_hydrated(identity, profile)
            }
            SessionEvent::BridgeQueried { embedded, identity } => {
                Ok(self.on_bridge_result(embedded, identity, "bridge_query"))
            }
            SessionEvent::BridgeReady { embedded, identity } => {
                Ok(self.on_bridge_result(embedded, identity, "bridge_ready"))
            }
            SessionEvent::ProfileResolved { ticket, outcome } => {
                Ok(self.on_profile_resolved(ticket, outcome))
            }
            SessionEvent::Cleared => Ok(self.on_cleared()),
        }
    }

    fn on_cache_hydrated(
        &mut self,
        identity: Option<SessionIdentity>,
        profile: Option<UserProfile>,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        if self.phase != SessionPhase::Uninitialized {
            return Err(SessionError::invalid_state(self.phase, "cache_hydrate"));
        }

        self.phase = SessionPhase::Resolving;
        self.torn_down = false;
        self.snapshot.session_loading = true;

        let Some(identity) = identity.filter(SessionIdentity::is_usable) else {
            debug!("no usable cached identity; waiting for bridge");
            return Ok(Vec::new());
        };

        self.snapshot.token = Some(identity.token);
        self.snapshot.user_id = Some(identity.user_id);
        self.snapshot.community_id = identity.community_id;

        match profile {
            Some(profile) if self.snapshot.user_id.as_deref() == Some(profile.user_id.as_str()) => {
                self.snapshot.profile = Some(profile);
            }
            Some(profile) => {
                debug!(
                    cached_user = %profile.user_id,
                    "ignoring cached profile for a different user"
                );
            }
            None => {}
        }

        // Cached credentials end the resolving phase optimistically.
        self.snapshot.session_loading = false;
        self.refresh_phase();

        let mut effects = Vec::new();
        self.announce_if_resolved(&mut effects);
        Ok(effects)
    }

    fn on_bridge_result(
        &mut self,
        embedded: bool,
        identity: Option<SessionIdentity>,
        source: &str,
    ) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        self.snapshot.is_embedded = embedded;

        match identity.filter(SessionIdentity::is_usable) {
            Some(identity) => self.adopt_identity(identity, &mut effects),
            None => trace!(source, embedded, "bridge reported no credentials"),
        }

        if matches!(
            self.phase,
            SessionPhase::Uninitialized | SessionPhase::Resolving
        ) {
            self.snapshot.session_loading = false;
        }
        self.torn_down = false;
        self.refresh_phase();
        self.ensure_profile_fetch(&mut effects);
        self.announce_if_resolved(&mut effects);
        effects
    }

    fn adopt_identity(&mut self, identity: SessionIdentity, effects: &mut Vec<SessionEffect>) {
        let user_changed = self.snapshot.user_id.as_deref() != Some(identity.user_id.as_str());
        let token_changed = self.snapshot.token.as_deref() != Some(identity.token.as_str());

        if user_changed || token_changed {
            if let Some(stale) = self.in_flight.take() {
                debug!(
                    generation = stale.generation,
                    "cancelling profile fetch for superseded credentials"
                );
                self.snapshot.profile_loading = false;
                effects.push(SessionEffect::CancelFetch(stale));
            }
        }

        if user_changed {
            if self.snapshot.profile.take().is_some() {
                debug!(user_id = %identity.user_id, "dropping profile of previous user");
            }
            self.announced = false;
        }

        let community_id = match identity.community_id {
            Some(community_id) => Some(community_id),
            None if !user_changed => self.snapshot.community_id.clone(),
            None => None,
        };

        self.snapshot.token = Some(identity.token.clone());
        self.snapshot.user_id = Some(identity.user_id.clone());
        self.snapshot.community_id = community_id.clone();

        effects.push(SessionEffect::PersistIdentity(SessionIdentity {
            token: identity.token,
            user_id: identity.user_id,
            community_id,
        }));
    }

    fn on_profile_resolved(
        &mut self,
        ticket: FetchTicket,
        outcome: Result<UserProfile, SessionError>,
    ) -> Vec<SessionEffect> {
        if self.in_flight.as_ref() != Some(&ticket) {
            debug!(
                generation = ticket.generation,
                "discarding stale profile fetch result"
            );
            return Vec::new();
        }

        self.in_flight = None;
        self.snapshot.profile_loading = false;

        let mut effects = Vec::new();
        match outcome {
            Ok(profile) if profile.user_id == ticket.user_id => {
                self.snapshot.profile = Some(profile.clone());
                effects.push(SessionEffect::PersistProfile(profile));
            }
            Ok(profile) => {
                warn!(
                    expected = %ticket.user_id,
                    received = %profile.user_id,
                    "profile lookup returned a different user; leaving profile unresolved"
                );
            }
            Err(err) => {
                debug!(code = %err.code, "profile fetch failed; keeping previous state");
            }
        }

        self.refresh_phase();
        self.announce_if_resolved(&mut effects);
        effects
    }

    fn on_cleared(&mut self) -> Vec<SessionEffect> {
        if self.torn_down && self.phase == SessionPhase::Uninitialized {
            trace!("session already cleared; re-posting unauthenticated");
            return vec![SessionEffect::NotifyFrame {
                is_authenticated: false,
            }];
        }

        let mut effects = Vec::new();
        if let Some(stale) = self.in_flight.take() {
            effects.push(SessionEffect::CancelFetch(stale));
        }
        effects.push(SessionEffect::ClearBridge);
        effects.push(SessionEffect::ClearPersisted);
        effects.push(SessionEffect::NotifyFrame {
            is_authenticated: false,
        });

        self.snapshot = SessionSnapshot::default();
        self.phase = SessionPhase::Uninitialized;
        self.announced = false;
        self.torn_down = true;
        effects
    }

    fn ensure_profile_fetch(&mut self, effects: &mut Vec<SessionEffect>) {
        if self.snapshot.profile.is_some() || self.in_flight.is_some() {
            return;
        }
        let (Some(token), Some(user_id)) = (&self.snapshot.token, &self.snapshot.user_id) else {
            return;
        };

        let ticket = FetchTicket {
            generation: self.next_generation,
            token: token.clone(),
            user_id: user_id.clone(),
        };
        self.next_generation += 1;
        self.snapshot.profile_loading = true;
        self.in_flight = Some(ticket.clone());
        effects.push(SessionEffect::FetchProfile(ticket));
    }

    fn announce_if_resolved(&mut self, effects: &mut Vec<SessionEffect>) {
        if self.phase == SessionPhase::AuthenticatedWithProfile && !self.announced {
            self.announced = true;
            effects.push(SessionEffect::NotifyFrame {
                is_authenticated: true,
            });
        }
    }

    fn refresh_phase(&mut self) {
        self.phase = if self.snapshot.is_authenticated() {
            if self.snapshot.profile.is_some() {
                SessionPhase::AuthenticatedWithProfile
            } else {
                SessionPhase::AuthenticatedNoProfile
            }
        } else if self.snapshot.session_loading {
            SessionPhase::Resolving
        } else {
            SessionPhase::Unauthenticated
        };
    }
}
