//! Registry of active tunnels
//!
//! Tunnels are keyed by the pod they were opened against. When the caller
//! addressed a service, an alias entry remembers which pod key the service
//! name led to, so the tunnel can later be stopped by either name.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::resolver::Addressing;
use super::session::{TunnelSession, TunnelState};

/// One tunnel slot: namespace, pod name and remote port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressKey {
    pub namespace: String,
    pub name: String,
    pub port: u16,
}

impl AddressKey {
    pub fn new(namespace: &str, name: &str, port: u16) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            port,
        }
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.port)
    }
}

/// A service name that resolved to some [`AddressKey`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasKey {
    pub namespace: String,
    pub service: String,
    pub port: u16,
}

impl AliasKey {
    pub fn new(namespace: &str, service: &str, port: u16) -> Self {
        Self {
            namespace: namespace.to_string(),
            service: service.to_string(),
            port,
        }
    }
}

impl fmt::Display for AliasKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.service, self.port)
    }
}

#[derive(Default)]
struct Tables {
    active: HashMap<AddressKey, TunnelSession>,
    aliases: HashMap<AliasKey, AddressKey>,
}

/// Active tunnels plus the alias table, behind one lock.
///
/// Every lookup-then-mutate sequence runs under a single guard, so two
/// concurrent calls never act on stale entries.
#[derive(Default)]
pub struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session` for the pod `addressing` points at.
    ///
    /// A tunnel already registered under the same key is stopped before the
    /// new one becomes visible.
    pub fn register(
        &self,
        namespace: &str,
        addressing: &Addressing,
        port: u16,
        session: TunnelSession,
    ) -> AddressKey {
        let key = AddressKey::new(namespace, addressing.pod(), port);
        debug!(key = %key, "Register pod key");

        let mut tables = self.lock();

        if let Some(previous) = tables.active.remove(&key) {
            previous.stop();
            debug!(key = %key, "Superseded previous port-forward");
        }

        if let Addressing::ViaAlias { service, .. } = addressing {
            let alias = AliasKey::new(namespace, service, port);
            debug!(alias = %alias, key = %key, "Register service key");
            tables.aliases.insert(alias, key.clone());
        }

        tables.active.insert(key.clone(), session);
        key
    }

    /// Stop whatever `name` reaches, as a pod name and as a service alias.
    ///
    /// Both lookups run; a name can reach one tunnel directly and another
    /// through an alias. Unknown names are ignored. Returns the number of
    /// tunnels stopped.
    pub fn stop(&self, namespace: &str, name: &str, port: u16) -> usize {
        let mut stopped = 0;
        let mut tables = self.lock();

        let key = AddressKey::new(namespace, name, port);
        debug!(key = %key, "Look up pod key");
        if let Some(session) = tables.active.remove(&key) {
            session.stop();
            stopped += 1;
            debug!(key = %key, "Stopped port-forward");
        }

        let alias = AliasKey::new(namespace, name, port);
        debug!(alias = %alias, "Look up service key");
        if let Some(target) = tables.aliases.remove(&alias) {
            if let Some(session) = tables.active.remove(&target) {
                session.stop();
                stopped += 1;
                debug!(key = %target, alias = %alias, "Stopped port-forward via service");
            }
        }

        stopped
    }

    /// Stop one specific session and drop its entries if they are still its own
    pub fn retire(&self, key: &AddressKey, session: &TunnelSession) {
        session.stop();

        let mut tables = self.lock();
        let owned = tables
            .active
            .get(key)
            .is_some_and(|current| current.id() == session.id());
        if owned {
            tables.active.remove(key);
            tables.aliases.retain(|_, target| target != key);
            debug!(key = %key, "Retired port-forward");
        }
    }

    /// Stop every registered tunnel
    pub fn stop_all(&self) -> usize {
        let mut tables = self.lock();
        let count = tables.active.len();
        for (_, session) in tables.active.drain() {
            session.stop();
        }
        tables.aliases.clear();
        count
    }

    pub fn state(&self, key: &AddressKey) -> Option<TunnelState> {
        self.lock().active.get(key).map(TunnelSession::state)
    }

    pub fn session(&self, key: &AddressKey) -> Option<TunnelSession> {
        self.lock().active.get(key).cloned()
    }

    pub fn alias_target(&self, alias: &AliasKey) -> Option<AddressKey> {
        self.lock().aliases.get(alias).cloned()
    }

    /// Snapshot of every registered tunnel and its state
    pub fn active(&self) -> Vec<(AddressKey, TunnelState)> {
        let tables = self.lock();
        let mut entries: Vec<_> = tables
            .active
            .iter()
            .map(|(key, session)| (key.clone(), session.state()))
            .collect();
        entries.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panicking holder leaves the tables consistent; every mutation is a
    // single map operation.
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::session::STARTUP_GRACE;
    use crate::k8s::testing::{fake_dialer, FakeTransport};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    async fn session() -> TunnelSession {
        TunnelSession::start(
            fake_dialer("podA", FakeTransport::default()),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            80,
            STARTUP_GRACE,
            true,
        )
        .await
        .unwrap()
    }

    fn direct(pod: &str) -> Addressing {
        Addressing::Direct { pod: pod.to_string() }
    }

    fn via(service: &str, pod: &str) -> Addressing {
        Addressing::ViaAlias {
            service: service.to_string(),
            pod: pod.to_string(),
        }
    }

    #[test]
    fn test_stop_unknown_key_is_noop() {
        let registry = Registry::new();
        assert_eq!(registry.stop("ns1", "nothing", 8080), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_by_pod_name() {
        let registry = Registry::new();
        let s = session().await;
        let key = registry.register("ns1", &direct("podA"), 8080, s.clone());

        assert_eq!(key, AddressKey::new("ns1", "podA", 8080));
        assert_eq!(registry.stop("ns1", "podA", 8080), 1);
        assert!(s.is_stopped());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_supersedes_previous_session() {
        let registry = Registry::new();
        let first = session().await;
        let second = session().await;

        registry.register("ns1", &direct("podA"), 8080, first.clone());
        registry.register("ns1", &direct("podA"), 8080, second.clone());

        tokio::time::timeout(Duration::from_secs(5), first.stop_signal().stopped())
            .await
            .expect("previous stop signal was not closed");
        assert!(!second.is_stopped());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.session(&AddressKey::new("ns1", "podA", 8080)).map(|s| s.id()),
            Some(second.id())
        );
        second.stop();
    }

    #[tokio::test]
    async fn test_stop_by_service_alias() {
        let registry = Registry::new();
        let s = session().await;
        registry.register("ns1", &via("svc1", "podA"), 80, s.clone());

        let alias = AliasKey::new("ns1", "svc1", 80);
        assert_eq!(
            registry.alias_target(&alias),
            Some(AddressKey::new("ns1", "podA", 80))
        );

        assert_eq!(registry.stop("ns1", "svc1", 80), 1);
        assert!(s.is_stopped());
        assert!(registry.is_empty());
        assert_eq!(registry.alias_target(&alias), None);

        // alias is gone, so a second stop does nothing
        assert_eq!(registry.stop("ns1", "svc1", 80), 0);
    }

    #[tokio::test]
    async fn test_stop_checks_pod_and_alias_paths() {
        let registry = Registry::new();
        // a pod that happens to share its name with a service
        let by_pod = session().await;
        let by_service = session().await;
        registry.register("ns1", &direct("web"), 80, by_pod.clone());
        registry.register("ns1", &via("web", "web-7f9c"), 80, by_service.clone());

        assert_eq!(registry.stop("ns1", "web", 80), 2);
        assert!(by_pod.is_stopped());
        assert!(by_service.is_stopped());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_by_pod_leaves_alias_until_used() {
        let registry = Registry::new();
        let s = session().await;
        registry.register("ns1", &via("svc1", "podA"), 80, s.clone());

        assert_eq!(registry.stop("ns1", "podA", 80), 1);
        let alias = AliasKey::new("ns1", "svc1", 80);
        assert!(registry.alias_target(&alias).is_some());

        assert_eq!(registry.stop("ns1", "svc1", 80), 0);
        assert_eq!(registry.alias_target(&alias), None);
    }

    #[tokio::test]
    async fn test_ports_are_part_of_the_key() {
        let registry = Registry::new();
        let http = session().await;
        let metrics = session().await;
        registry.register("ns1", &direct("podA"), 80, http.clone());
        registry.register("ns1", &direct("podA"), 9090, metrics.clone());

        registry.stop("ns1", "podA", 9090);
        assert!(metrics.is_stopped());
        assert!(!http.is_stopped());
        assert_eq!(registry.len(), 1);
        http.stop();
    }

    #[tokio::test]
    async fn test_retire_ignores_superseded_session() {
        let registry = Registry::new();
        let first = session().await;
        let second = session().await;
        let key = registry.register("ns1", &via("svc1", "podA"), 80, first.clone());
        registry.register("ns1", &via("svc1", "podA"), 80, second.clone());

        registry.retire(&key, &first);
        assert_eq!(registry.len(), 1);
        assert!(!second.is_stopped());

        registry.retire(&key, &second);
        assert!(registry.is_empty());
        assert_eq!(registry.alias_target(&AliasKey::new("ns1", "svc1", 80)), None);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_stop() {
        let registry = std::sync::Arc::new(Registry::new());
        let mut sessions = Vec::new();
        for _ in 0..8 {
            sessions.push(session().await);
        }

        let mut tasks = Vec::new();
        for (i, s) in sessions.iter().cloned().enumerate() {
            let registry = std::sync::Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.register("ns1", &direct("podA"), 80, s);
                if i % 2 == 0 {
                    registry.stop("ns1", "podA", 80);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let live = sessions.iter().filter(|s| !s.is_stopped()).count();
        assert!(live <= 1);
        assert_eq!(registry.len(), live);
    }

    #[tokio::test]
    async fn test_active_snapshot() {
        let registry = Registry::new();
        let a = session().await;
        let b = session().await;
        registry.register("ns1", &direct("podA"), 80, a.clone());
        registry.register("ns2", &direct("podB"), 80, b.clone());

        let active = registry.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].0, AddressKey::new("ns1", "podA", 80));
        assert_eq!(active[0].1, TunnelState::Ready);

        assert_eq!(registry.stop_all(), 2);
        assert!(a.is_stopped() && b.is_stopped());
    }
}
