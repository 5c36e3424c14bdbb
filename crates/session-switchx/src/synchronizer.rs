//! Runtime driving [`SessionStateMachine`] from the cache, the host bridge and
//! profile lookups.
//!
//! The machine lives behind one mutex. Every transition runs its effects while
//! that lock is held, so effects are observed in transition order; the lock is
//! never held across an `.await`. The one exception is the host bridge's
//! `clear`, which is called after the lock is released so the host may call
//! back into the synchronizer. Profile lookups run on spawned tasks and report
//! back through [`SessionEvent::ProfileResolved`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use session_core::{
    BridgeReady, FetchTicket, SessionChannels, SessionEffect, SessionError, SessionErrorCategory,
    SessionEvent, SessionIdentity, SessionPhase, SessionSnapshot, SessionStateMachine,
    SnapshotStream, UserProfile,
};
use session_platform::{BridgeProbe, Clock, FramePort, HostBridge, KeyValueStore, SystemClock};
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    cache::SessionCache, config::SyncConfig, lookup::ProfileLookup, notifier::FrameNotifier,
};

/// Collaborators injected into a [`SessionSynchronizer`].
pub struct SessionDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub probe: Arc<dyn BridgeProbe>,
    pub lookup: Arc<dyn ProfileLookup>,
    /// Embedding frame; `None` when the session is not framed.
    pub frame: Option<Arc<dyn FramePort>>,
    pub clock: Arc<dyn Clock>,
}

impl SessionDeps {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        probe: Arc<dyn BridgeProbe>,
        lookup: Arc<dyn ProfileLookup>,
    ) -> Self {
        Self {
            store,
            probe,
            lookup,
            frame: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_frame(mut self, frame: Arc<dyn FramePort>) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchOutcome {
    Applied,
    Failed(SessionError),
    Cancelled,
    Stale,
}

type OutcomeWatch = watch::Receiver<Option<FetchOutcome>>;

/// Result of re-probing the host bridge.
struct BridgeAnswer {
    /// The bridge reported a usable token/user pair.
    credentials: bool,
    pending: Option<OutcomeWatch>,
}

struct RunningFetch {
    ticket: FetchTicket,
    cancel: CancellationToken,
    outcome: OutcomeWatch,
}

struct Shared {
    machine: Mutex<SessionStateMachine>,
    bridge: Mutex<Option<Arc<dyn HostBridge>>>,
    fetch: Mutex<Option<RunningFetch>>,
    cache: SessionCache,
    probe: Arc<dyn BridgeProbe>,
    lookup: Arc<dyn ProfileLookup>,
    notifier: Option<FrameNotifier>,
    channels: SessionChannels,
    runtime: Handle,
}

impl Shared {
    fn lock_machine(&self) -> MutexGuard<'_, SessionStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_bridge(&self) -> MutexGuard<'_, Option<Arc<dyn HostBridge>>> {
        self.bridge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_fetch(&self) -> MutexGuard<'_, Option<RunningFetch>> {
        self.fetch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one event and run its effects.
    ///
    /// Returns the outcome watch of the fetch in flight after the transition.
    fn dispatch(
        self: &Arc<Self>,
        event: SessionEvent,
    ) -> Result<Option<OutcomeWatch>, SessionError> {
        let mut machine = self.lock_machine();
        let effects = machine.apply(event)?;
        let bridge_to_clear = self.commit(&machine, effects);
        let pending = self.in_flight_outcome(&machine);
        drop(machine);

        if let Some(bridge) = bridge_to_clear {
            bridge.clear();
        }
        Ok(pending)
    }

    /// Run effects and publish the snapshot.
    ///
    /// `ClearBridge` is not run here; the bridge it targets is returned so the
    /// caller can clear it once the machine lock is released.
    fn commit(
        self: &Arc<Self>,
        machine: &SessionStateMachine,
        effects: Vec<SessionEffect>,
    ) -> Option<Arc<dyn HostBridge>> {
        let mut bridge_to_clear = None;
        for effect in effects {
            match effect {
                SessionEffect::ClearBridge => {
                    bridge_to_clear = self.lock_bridge().clone();
                    if bridge_to_clear.is_none() {
                        trace!("no host bridge to clear");
                    }
                }
                effect => self.execute(effect),
            }
        }
        self.channels.publish(machine.snapshot().clone());
        bridge_to_clear
    }

    fn in_flight_outcome(&self, machine: &SessionStateMachine) -> Option<OutcomeWatch> {
        let ticket = machine.in_flight()?;
        self.lock_fetch()
            .as_ref()
            .filter(|running| &running.ticket == ticket)
            .map(|running| running.outcome.clone())
    }

    fn execute(self: &Arc<Self>, effect: SessionEffect) {
        match effect {
            SessionEffect::PersistIdentity(identity) => {
                if let Err(err) = self.cache.write_identity(&identity) {
                    warn!(code = %err.code, error = %err.message, "failed persisting identity");
                }
            }
            SessionEffect::PersistProfile(profile) => {
                if let Err(err) = self.cache.write_profile(&profile) {
                    warn!(code = %err.code, error = %err.message, "failed persisting profile");
                }
            }
            SessionEffect::FetchProfile(ticket) => self.spawn_fetch(ticket),
            SessionEffect::CancelFetch(ticket) => self.cancel_fetch(&ticket),
            SessionEffect::NotifyFrame { is_authenticated } => match &self.notifier {
                Some(notifier) => {
                    notifier.notify(is_authenticated);
                }
                None => trace!(is_authenticated, "no embedding frame to notify"),
            },
            // Deferred by `commit` until the machine lock is released.
            SessionEffect::ClearBridge => {}
            SessionEffect::ClearPersisted => {
                if let Err(err) = self.cache.clear() {
                    warn!(code = %err.code, error = %err.message, "failed clearing session cache");
                }
            }
        }
    }

    fn resolve_initial(self: &Arc<Self>) {
        let cached = self.cache.read();
        debug!(
            cached_identity = cached.identity.is_some(),
            cached_profile = cached.profile.is_some(),
            "hydrating session from cache"
        );
        if let Err(err) = self.dispatch(SessionEvent::CacheHydrated {
            identity: cached.identity,
            profile: cached.profile,
        }) {
            warn!(code = %err.code, error = %err.message, "cache hydration rejected");
        }
        if let Err(err) = self.query_bridge(false) {
            warn!(code = %err.code, error = %err.message, "initial bridge query rejected");
        }
    }

    /// Re-probe the bridge and feed its answer to the machine.
    fn query_bridge(self: &Arc<Self>, after_ready: bool) -> Result<BridgeAnswer, SessionError> {
        let bridge = self.probe.probe();
        let embedded = bridge.is_some();
        let identity = bridge.as_ref().and_then(read_bridge_identity);
        let credentials = identity
            .as_ref()
            .is_some_and(|identity| identity.is_usable());
        *self.lock_bridge() = bridge;

        let event = if after_ready {
            SessionEvent::BridgeReady { embedded, identity }
        } else {
            SessionEvent::BridgeQueried { embedded, identity }
        };
        let pending = self.dispatch(event)?;
        Ok(BridgeAnswer {
            credentials,
            pending,
        })
    }

    fn spawn_fetch(self: &Arc<Self>, ticket: FetchTicket) {
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        debug!(
            generation = ticket.generation,
            user_id = %ticket.user_id,
            "starting profile fetch"
        );

        let shared = Arc::clone(self);
        let task_ticket = ticket.clone();
        let task_cancel = cancel.clone();
        self.runtime.spawn(async move {
            let outcome = shared.run_fetch(task_ticket, task_cancel).await;
            let _ = outcome_tx.send(Some(outcome));
        });

        let previous = self.lock_fetch().replace(RunningFetch {
            ticket,
            cancel,
            outcome: outcome_rx,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    fn cancel_fetch(&self, ticket: &FetchTicket) {
        let mut slot = self.lock_fetch();
        if slot.as_ref().is_some_and(|running| &running.ticket == ticket) {
            if let Some(running) = slot.take() {
                debug!(generation = ticket.generation, "cancelling profile fetch");
                running.cancel.cancel();
            }
        }
    }

    async fn run_fetch(
        self: Arc<Self>,
        ticket: FetchTicket,
        cancel: CancellationToken,
    ) -> FetchOutcome {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.lookup.fetch_profile(&ticket.user_id, &ticket.token) => Some(result),
        };

        let outcome = match result {
            Some(_) if cancel.is_cancelled() => FetchOutcome::Cancelled,
            Some(result) => {
                let result = result.and_then(|profile| ensure_profile_owner(&ticket, profile));
                self.apply_fetch_result(&ticket, result)
            }
            None => FetchOutcome::Cancelled,
        };
        if outcome == FetchOutcome::Cancelled {
            debug!(generation = ticket.generation, "profile fetch cancelled");
        }

        let mut slot = self.lock_fetch();
        if slot.as_ref().is_some_and(|running| running.ticket == ticket) {
            slot.take();
        }
        outcome
    }

    fn apply_fetch_result(
        self: &Arc<Self>,
        ticket: &FetchTicket,
        result: Result<UserProfile, SessionError>,
    ) -> FetchOutcome {
        let mut machine = self.lock_machine();
        if machine.in_flight() != Some(ticket) {
            debug!(generation = ticket.generation, "profile fetch superseded");
            return FetchOutcome::Stale;
        }

        let failure = result.as_ref().err().cloned();
        match machine.apply(SessionEvent::ProfileResolved {
            ticket: ticket.clone(),
            outcome: result,
        }) {
            Ok(effects) => {
                // Fetch results never clear the bridge.
                let _ = self.commit(&machine, effects);
            }
            Err(err) => return FetchOutcome::Failed(err),
        }

        match failure {
            Some(err) => {
                warn!(
                    user_id = %ticket.user_id,
                    code = %err.code,
                    error = %err.message,
                    "profile fetch failed"
                );
                FetchOutcome::Failed(err)
            }
            None => FetchOutcome::Applied,
        }
    }
}

fn read_bridge_identity(bridge: &Arc<dyn HostBridge>) -> Option<SessionIdentity> {
    let auth = bridge.query_auth()?;
    let community_id = bridge.query_community().map(|community| community.id);
    Some(SessionIdentity::new(auth.token, auth.user_id, community_id))
}

fn ensure_profile_owner(
    ticket: &FetchTicket,
    profile: UserProfile,
) -> Result<UserProfile, SessionError> {
    if profile.user_id == ticket.user_id {
        return Ok(profile);
    }
    Err(SessionError::new(
        SessionErrorCategory::Internal,
        "profile_user_mismatch",
        format!(
            "lookup for '{}' returned profile of '{}'",
            ticket.user_id, profile.user_id
        ),
    ))
}

async fn listen_for_ready(shared: Arc<Shared>, mut ready_rx: mpsc::Receiver<BridgeReady>) {
    while ready_rx.recv().await.is_some() {
        debug!("bridge ready signal received");
        if let Err(err) = shared.query_bridge(true) {
            warn!(code = %err.code, error = %err.message, "bridge ready handling rejected");
        }
    }
    debug!("bridge ready channel closed");
}

/// Owns the session snapshot for one embedded or standalone session.
pub struct SessionSynchronizer {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl SessionSynchronizer {
    /// Start on the ambient Tokio runtime.
    pub fn start(config: SyncConfig, deps: SessionDeps) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|err| {
            SessionError::new(
                SessionErrorCategory::Config,
                "no_async_runtime",
                err.to_string(),
            )
        })?;
        Ok(Self::spawn(config, deps, runtime))
    }

    /// Hydrate from cache, query the bridge, and start listening for ready signals.
    ///
    /// Hydration and the first bridge query complete before this returns; a
    /// profile fetch, if one is needed, keeps running on `runtime`.
    pub fn spawn(config: SyncConfig, deps: SessionDeps, runtime: Handle) -> Self {
        let (channels, ready_rx) = SessionChannels::new(config.ready_buffer);
        let cache = SessionCache::new(
            deps.store,
            config.cache_namespace.clone(),
            Arc::clone(&deps.clock),
            config.profile_ttl_ms,
        );
        let notifier = deps.frame.map(|port| {
            FrameNotifier::new(port, config.target_origin.clone(), Arc::clone(&deps.clock))
        });
        if notifier.is_some() && config.target_origin.is_wildcard() {
            warn!(
                "frame messages target any origin; configure the embedding origin for production"
            );
        }

        let shared = Arc::new(Shared {
            machine: Mutex::new(SessionStateMachine::default()),
            bridge: Mutex::new(None),
            fetch: Mutex::new(None),
            cache,
            probe: deps.probe,
            lookup: deps.lookup,
            notifier,
            channels,
            runtime: runtime.clone(),
        });

        shared.resolve_initial();
        let listener = runtime.spawn(listen_for_ready(Arc::clone(&shared), ready_rx));

        let snapshot = shared.channels.current();
        info!(
            embedded = snapshot.is_embedded,
            authenticated = snapshot.is_authenticated(),
            profile_loading = snapshot.profile_loading,
            "session synchronizer started"
        );
        Self { shared, listener }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.channels.current()
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.shared.channels.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock_machine().phase()
    }

    /// Sender the host uses to announce that its bridge finished injecting.
    pub fn ready_sender(&self) -> mpsc::Sender<BridgeReady> {
        self.shared.channels.ready_sender()
    }

    /// Handle a ready signal inline instead of through the channel.
    pub fn handle_bridge_ready(&self) {
        if let Err(err) = self.shared.query_bridge(true) {
            warn!(code = %err.code, error = %err.message, "bridge ready handling rejected");
        }
    }

    /// Tear the session down.
    ///
    /// Resets the snapshot, deletes both cache entries, posts the
    /// unauthenticated message and then asks the bridge to drop its
    /// credentials. Clearing an already cleared session only posts the
    /// message again.
    pub fn clear(&self) {
        match self.shared.dispatch(SessionEvent::Cleared) {
            Ok(_) => info!("session cleared"),
            Err(err) => warn!(code = %err.code, error = %err.message, "session clear rejected"),
        }
    }

    /// Re-query the bridge, bypassing the cache, and wait for any profile fetch
    /// this starts or joins.
    ///
    /// Returns whether the bridge produced a token/user pair; `false` when no
    /// bridge is reachable or it reports no credentials, even if cached
    /// credentials are still held. A failed profile fetch is returned as an
    /// error; the snapshot keeps its previous profile state.
    pub async fn refresh(&self) -> Result<bool, SessionError> {
        let answer = self.shared.query_bridge(false)?;
        if let Some(mut pending) = answer.pending {
            let outcome = pending
                .wait_for(Option::is_some)
                .await
                .map(|settled| (*settled).clone())
                .ok()
                .flatten();
            if let Some(FetchOutcome::Failed(err)) = outcome {
                return Err(err);
            }
        }
        Ok(answer.credentials)
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.listener.abort();
        if let Some(running) = self.shared.lock_fetch().take() {
            running.cancel.cancel();
        }
    }
}
