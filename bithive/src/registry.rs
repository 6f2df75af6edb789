//! The ordered list of devices being monitored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{KeyValueStore, keys};
use crate::tracing::prelude::*;

/// What `add` does with an address already in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum DuplicatePolicy {
    /// Append anyway; the device is polled once per entry.
    #[default]
    Allow,
    /// Leave the registry unchanged.
    Reject,
}

/// Device addresses in display order, persisted on every change.
pub struct DeviceRegistry {
    store: Arc<dyn KeyValueStore>,
    addresses: Vec<String>,
    duplicates: DuplicatePolicy,
}

impl DeviceRegistry {
    /// Load the registry from `store`. Nothing stored means empty.
    pub fn load(store: Arc<dyn KeyValueStore>, duplicates: DuplicatePolicy) -> Self {
        let addresses = match store.get(keys::DEVICES) {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "Stored device list is unreadable, starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        Self {
            store,
            addresses,
            duplicates,
        }
    }

    /// Append `address`. Returns whether the registry changed.
    ///
    /// Blank addresses are ignored, as are duplicates under
    /// [`DuplicatePolicy::Reject`].
    pub fn add(&mut self, address: &str) -> Result<bool> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(false);
        }
        if self.duplicates == DuplicatePolicy::Reject && self.contains(address) {
            debug!(address, "Device already registered");
            return Ok(false);
        }

        self.addresses.push(address.to_string());
        self.persist()?;
        info!(address, devices = self.addresses.len(), "Device added");
        Ok(true)
    }

    /// Remove every entry equal to `address`. Returns how many went.
    pub fn remove(&mut self, address: &str) -> Result<usize> {
        let address = address.trim();
        let before = self.addresses.len();
        self.addresses.retain(|a| a != address);
        let removed = before - self.addresses.len();

        if removed > 0 {
            self.persist()?;
            info!(address, removed, "Device removed");
        }
        Ok(removed)
    }

    pub fn list(&self) -> &[String] {
        &self.addresses
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Reread the list from the store, picking up edits made through other
    /// handles on it.
    pub fn reload(&mut self) {
        let fresh = Self::load(self.store.clone(), self.duplicates);
        if fresh.addresses != self.addresses {
            info!(devices = fresh.addresses.len(), "Device list changed in store");
        }
        *self = fresh;
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(&self.addresses)?;
        self.store.set(keys::DEVICES, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn registry(policy: DuplicatePolicy) -> (DeviceRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (DeviceRegistry::load(store.clone(), policy), store)
    }

    #[test]
    fn starts_empty_without_stored_state() {
        let (registry, _store) = registry(DuplicatePolicy::Allow);
        assert!(registry.is_empty());
    }

    #[test]
    fn add_appends_in_order_and_persists() {
        let (mut registry, store) = registry(DuplicatePolicy::Allow);
        assert!(registry.add("10.0.0.2").unwrap());
        assert!(registry.add(" 10.0.0.3 ").unwrap());

        assert_eq!(registry.list(), ["10.0.0.2", "10.0.0.3"]);
        assert_eq!(
            store.get(keys::DEVICES).as_deref(),
            Some(r#"["10.0.0.2","10.0.0.3"]"#)
        );
    }

    #[test]
    fn blank_address_is_ignored() {
        let (mut registry, store) = registry(DuplicatePolicy::Allow);
        assert!(!registry.add("   ").unwrap());
        assert!(registry.is_empty());
        assert_eq!(store.get(keys::DEVICES), None);
    }

    #[test]
    fn duplicates_follow_policy() {
        let (mut allow, _) = registry(DuplicatePolicy::Allow);
        allow.add("10.0.0.2").unwrap();
        assert!(allow.add("10.0.0.2").unwrap());
        assert_eq!(allow.len(), 2);

        let (mut reject, _) = registry(DuplicatePolicy::Reject);
        reject.add("10.0.0.2").unwrap();
        assert!(!reject.add("10.0.0.2").unwrap());
        assert_eq!(reject.len(), 1);
    }

    #[test]
    fn remove_drops_all_matching_entries() {
        let (mut registry, _store) = registry(DuplicatePolicy::Allow);
        registry.add("a").unwrap();
        registry.add("b").unwrap();
        registry.add("a").unwrap();

        assert_eq!(registry.remove("a").unwrap(), 2);
        assert_eq!(registry.list(), ["b"]);
        assert_eq!(registry.remove("missing").unwrap(), 0);
    }

    #[test]
    fn reloads_from_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut registry = DeviceRegistry::load(store.clone(), DuplicatePolicy::Allow);
            registry.add("bitaxe-1.local").unwrap();
        }

        let registry = DeviceRegistry::load(store, DuplicatePolicy::Allow);
        assert_eq!(registry.list(), ["bitaxe-1.local"]);
    }

    #[test]
    fn reload_picks_up_edits_from_another_handle() {
        let (mut watcher, store) = registry(DuplicatePolicy::Allow);
        watcher.add("a").unwrap();

        let mut cli = DeviceRegistry::load(store, DuplicatePolicy::Allow);
        cli.add("b").unwrap();
        assert_eq!(watcher.list(), ["a"]);

        watcher.reload();
        assert_eq!(watcher.list(), ["a", "b"]);
    }

    #[test]
    fn corrupt_stored_list_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::DEVICES, "{oops").unwrap();

        let registry = DeviceRegistry::load(store, DuplicatePolicy::Allow);
        assert!(registry.is_empty());
    }
}
