use std::sync::{
    Arc, RwLock,
    atomic::{AtomicUsize, Ordering},
};

/// Credentials reported by the host bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeAuth {
    pub token: String,
    pub user_id: String,
}

/// Community the host embeds the session in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCommunity {
    pub id: String,
    pub name: String,
}

/// Identity interface injected by an embedding host.
pub trait HostBridge: Send + Sync {
    fn query_auth(&self) -> Option<BridgeAuth>;

    fn query_community(&self) -> Option<BridgeCommunity> {
        None
    }

    /// Drop the host's own copy of the credentials.
    fn clear(&self);
}

/// Locates the host bridge; `None` means the session is not embedded.
pub trait BridgeProbe: Send + Sync {
    fn probe(&self) -> Option<Arc<dyn HostBridge>>;
}

/// Probe for standalone (non-embedded) sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBridge;

impl BridgeProbe for NoBridge {
    fn probe(&self) -> Option<Arc<dyn HostBridge>> {
        None
    }
}

/// In-process bridge whose answers can be changed at runtime.
#[derive(Default)]
pub struct StaticHostBridge {
    auth: RwLock<Option<BridgeAuth>>,
    community: RwLock<Option<BridgeCommunity>>,
    clear_calls: AtomicUsize,
}

impl StaticHostBridge {
    pub fn new(auth: Option<BridgeAuth>, community: Option<BridgeCommunity>) -> Self {
        Self {
            auth: RwLock::new(auth),
            community: RwLock::new(community),
            clear_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_auth(&self, auth: Option<BridgeAuth>) {
        if let Ok(mut slot) = self.auth.write() {
            *slot = auth;
        }
    }

    pub fn set_community(&self, community: Option<BridgeCommunity>) {
        if let Ok(mut slot) = self.community.write() {
            *slot = community;
        }
    }

    /// Number of times [`HostBridge::clear`] was invoked.
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }
}

impl HostBridge for StaticHostBridge {
    fn query_auth(&self) -> Option<BridgeAuth> {
        self.auth.read().ok().and_then(|auth| auth.clone())
    }

    fn query_community(&self) -> Option<BridgeCommunity> {
        self.community
            .read()
            .ok()
            .and_then(|community| community.clone())
    }

    fn clear(&self) {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.set_auth(None);
    }
}

/// Probe that reports a bridge once one has been installed.
#[derive(Default)]
pub struct StaticBridgeProbe {
    bridge: RwLock<Option<Arc<dyn HostBridge>>>,
}

impl StaticBridgeProbe {
    pub fn new(bridge: Option<Arc<dyn HostBridge>>) -> Self {
        Self {
            bridge: RwLock::new(bridge),
        }
    }

    /// Install or remove the bridge returned by later probes.
    pub fn install(&self, bridge: Option<Arc<dyn HostBridge>>) {
        if let Ok(mut slot) = self.bridge.write() {
            *slot = bridge;
        }
    }
}

impl BridgeProbe for StaticBridgeProbe {
    fn probe(&self) -> Option<Arc<dyn HostBridge>> {
        self.bridge.read().ok().and_then(|bridge| bridge.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_bridge_clear_drops_credentials() {
        let bridge = StaticHostBridge::new(
            Some(BridgeAuth {
                token: "tok".into(),
                user_id: "user".into(),
            }),
            Some(BridgeCommunity {
                id: "c-1".into(),
                name: "Makers".into(),
            }),
        );
        assert!(bridge.query_auth().is_some());

        bridge.clear();
        assert_eq!(bridge.query_auth(), None);
        assert_eq!(bridge.clear_calls(), 1);
        assert_eq!(
            bridge.query_community().map(|c| c.id),
            Some("c-1".to_owned())
        );
    }

    #[test]
    fn probe_reflects_installed_bridge() {
        let probe = StaticBridgeProbe::default();
        assert!(probe.probe().is_none());
        assert!(NoBridge.probe().is_none());

        probe.install(Some(Arc::new(StaticHostBridge::default())));
        let bridge = probe.probe().expect("bridge should be installed");
        assert_eq!(bridge.query_auth(), None);
        assert_eq!(bridge.query_community(), None);
    }
}
