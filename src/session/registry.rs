// src/session/registry.rs
//
// Table of live sessions keyed by device id, plus the connected-id set the
// device listing reads. Both live under one lock so they never disagree.
//
// Lock order: registry lock, then any per-session lock. Sessions are torn
// down while the registry lock is held, so a session is never reachable from
// the registry after its port is closed.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::Session;
use crate::devices::{DeviceId, WILDCARD_DEVICE_ID};

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<DeviceId, Arc<Session>>,
    connected: HashSet<DeviceId>,
    /// Device opened through id 0; later calls with id 0 address it
    wildcard: Option<DeviceId>,
}

impl RegistryState {
    fn resolve(&self, device_id: DeviceId) -> DeviceId {
        if device_id == WILDCARD_DEVICE_ID {
            self.wildcard.unwrap_or(WILDCARD_DEVICE_ID)
        } else {
            device_id
        }
    }

    fn take(&mut self, device_id: DeviceId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(&device_id)?;
        self.connected.remove(&device_id);
        if self.wildcard == Some(device_id) {
            self.wildcard = None;
        }
        Some(session)
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Any session already registered for the same device
    /// is torn down first and returned.
    pub fn insert(&self, session: Arc<Session>, via_wildcard: bool) -> Option<Arc<Session>> {
        let device_id = session.device_id();
        let mut state = self.state.lock();

        let replaced = state.take(device_id);
        if let Some(old) = &replaced {
            old.teardown();
        }

        state.sessions.insert(device_id, session);
        state.connected.insert(device_id);
        if via_wildcard {
            state.wildcard = Some(device_id);
        }
        replaced
    }

    /// Look up a session. Id 0 resolves to the session opened as wildcard.
    pub fn get(&self, device_id: DeviceId) -> Option<Arc<Session>> {
        let state = self.state.lock();
        let key = state.resolve(device_id);
        state.sessions.get(&key).cloned()
    }

    /// Tear down and unregister a session. `None` when nothing was registered.
    pub fn remove(&self, device_id: DeviceId) -> Option<Arc<Session>> {
        let mut state = self.state.lock();
        let key = state.resolve(device_id);
        let session = state.take(key)?;
        session.teardown();
        Some(session)
    }

    /// Tear down and unregister every session whose device is not in `live`,
    /// and every session whose reader has faulted. Returns what was removed.
    pub fn retain_live(&self, live: &HashSet<DeviceId>) -> Vec<Arc<Session>> {
        let mut state = self.state.lock();
        let doomed: Vec<DeviceId> = state
            .sessions
            .iter()
            .filter(|(id, session)| !live.contains(id) || session.is_faulted())
            .map(|(id, _)| *id)
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for device_id in doomed {
            if let Some(session) = state.take(device_id) {
                session.teardown();
                removed.push(session);
            }
        }
        removed
    }

    /// Tear down and unregister everything.
    pub fn drain_all(&self) -> Vec<Arc<Session>> {
        let mut state = self.state.lock();
        let ids: Vec<DeviceId> = state.sessions.keys().copied().collect();
        let mut removed = Vec::with_capacity(ids.len());
        for device_id in ids {
            if let Some(session) = state.take(device_id) {
                session.teardown();
                removed.push(session);
            }
        }
        removed
    }

    pub fn is_connected(&self, device_id: DeviceId) -> bool {
        let state = self.state.lock();
        let key = state.resolve(device_id);
        state.connected.contains(&key)
    }

    pub fn connected_ids(&self) -> HashSet<DeviceId> {
        self.state.lock().connected.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DriverKind;
    use crate::io::mock::{MockDeviceSpec, MockTransport};
    use crate::io::UsbTransport;
    use crate::session::ReaderConfig;
    use std::time::Duration;

    fn start(transport: &MockTransport, device_id: DeviceId) -> Arc<Session> {
        let info = transport
            .list_devices()
            .unwrap()
            .into_iter()
            .find(|d| d.device_id == device_id)
            .unwrap();
        let port = transport.open_port(&info, DriverKind::CdcAcm).unwrap();
        let config = ReaderConfig {
            chunk_size: 64,
            poll: Duration::from_millis(10),
        };
        Session::start(device_id, DriverKind::CdcAcm, format!("mock {}", device_id), port, config).unwrap()
    }

    fn assert_consistent(registry: &SessionRegistry) {
        let state = registry.state.lock();
        let keys: HashSet<DeviceId> = state.sessions.keys().copied().collect();
        assert_eq!(keys, state.connected);
    }

    #[test]
    fn test_insert_get_remove() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let registry = SessionRegistry::new();

        assert!(registry.insert(start(&transport, id), false).is_none());
        assert!(registry.is_connected(id));
        assert!(registry.get(id).is_some());
        assert_consistent(&registry);

        let removed = registry.remove(id).unwrap();
        assert!(removed.is_torn_down());
        assert!(!transport.is_port_open(id));
        assert!(registry.remove(id).is_none());
        assert!(!registry.is_connected(id));
        assert!(registry.is_empty());
        assert_consistent(&registry);
    }

    #[test]
    fn test_insert_replaces_and_tears_down_previous() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let registry = SessionRegistry::new();

        let first = start(&transport, id);
        registry.insert(first.clone(), false);
        first.teardown();
        let second = start(&transport, id);
        let replaced = registry.insert(second.clone(), false).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(id).unwrap(), &second));
        assert_consistent(&registry);
    }

    #[test]
    fn test_wildcard_alias() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x0403, 0x6001).with_id(4));
        let registry = SessionRegistry::new();

        assert!(registry.get(WILDCARD_DEVICE_ID).is_none());
        registry.insert(start(&transport, id), true);
        assert_eq!(registry.get(WILDCARD_DEVICE_ID).unwrap().device_id(), 4);
        assert!(registry.is_connected(WILDCARD_DEVICE_ID));

        assert!(registry.remove(WILDCARD_DEVICE_ID).is_some());
        assert!(registry.get(4).is_none());
        assert!(registry.get(WILDCARD_DEVICE_ID).is_none());
    }

    #[test]
    fn test_retain_live_drops_orphans() {
        let transport = MockTransport::new();
        let a = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let b = transport.attach(MockDeviceSpec::new(0x1a86, 0x7523));
        let registry = SessionRegistry::new();
        registry.insert(start(&transport, a), false);
        registry.insert(start(&transport, b), false);

        let live: HashSet<DeviceId> = [b].into_iter().collect();
        let removed = registry.retain_live(&live);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].device_id(), a);
        assert_eq!(registry.connected_ids(), live);
        assert_consistent(&registry);

        assert_eq!(registry.drain_all().len(), 1);
        assert!(registry.is_empty());
    }
}
