//! Object store abstraction and the in-memory implementation.
//!
//! The store owns object identity (UIDs, generations, resource versions)
//! and physical removal. Writes with a stale resource version fail with
//! [`StoreError::Conflict`]; the writer must re-fetch.

use crate::types::{BundleDeployment, BundleDeploymentSpec, ResourceGroup};
use chrono::Utc;
use deployer::ObjectKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

const DEPLOYMENT_KIND: &str = "BundleDeployment";
const RESOURCE_GROUP_KIND: &str = "ResourceGroup";

/// Errors returned by object stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Object kind.
        kind: &'static str,
        /// Object key.
        key: ObjectKey,
    },

    /// The write was based on an outdated copy.
    #[error("conflict on {key}: resource version {expected} is stale (current {current})")]
    Conflict {
        /// Object key.
        key: ObjectKey,
        /// Version the writer read.
        expected: u64,
        /// Version in the store.
        current: u64,
    },

    /// An object with this key already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Object kind.
        kind: &'static str,
        /// Object key.
        key: ObjectKey,
    },
}

impl StoreError {
    /// Whether the error means the caller's copy is outdated
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::NotFound { .. })
    }
}

/// Persistent object storage with watch notifications
///
/// Every successful write notifies subscribers with the written key.
pub trait ObjectStore: Send + Sync {
    /// Fetch a deployment; `None` when it does not exist
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<BundleDeployment>>;

    /// Write metadata and spec (status is ignored)
    ///
    /// Returns `None` when the write removed the last finalizer of a
    /// terminating object and the store deleted it.
    fn update(&self, obj: &BundleDeployment) -> StoreResult<Option<BundleDeployment>>;

    /// Write status only
    fn update_status(&self, obj: &BundleDeployment) -> StoreResult<BundleDeployment>;

    /// Fetch the ResourceGroup stored under `key`
    fn get_resource_group(&self, key: &ObjectKey) -> StoreResult<Option<ResourceGroup>>;

    /// Create a ResourceGroup; fails with `AlreadyExists` if present
    fn create_resource_group(&self, group: &ResourceGroup) -> StoreResult<ResourceGroup>;

    /// Receive the key of every object written from now on
    fn subscribe(&self) -> Receiver<ObjectKey>;
}

/// Serializable copy of a store's contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Every BundleDeployment
    #[serde(default)]
    pub deployments: Vec<BundleDeployment>,
    /// Every ResourceGroup
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroup>,
}

/// Thread-safe in-memory object store
///
/// Also provides the owner-side operations (create, spec edits, delete
/// requests) that a real API server would accept from users.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    watchers: Mutex<Vec<Sender<ObjectKey>>>,
}

#[derive(Debug, Default)]
struct StoreState {
    deployments: BTreeMap<ObjectKey, BundleDeployment>,
    groups: BTreeMap<ObjectKey, ResourceGroup>,
    last_version: u64,
}

impl StoreState {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn current(&self, key: &ObjectKey) -> StoreResult<&BundleDeployment> {
        self.deployments.get(key).ok_or_else(|| StoreError::NotFound {
            kind: DEPLOYMENT_KIND,
            key: key.clone(),
        })
    }

    fn check_version(&self, obj: &BundleDeployment) -> StoreResult<()> {
        let key = obj.key();
        let current = self.current(&key)?.metadata.resource_version;
        if current != obj.metadata.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: obj.metadata.resource_version,
                current,
            });
        }
        Ok(())
    }

    /// Remove a deployment together with the ResourceGroup it owns
    fn remove(&mut self, key: &ObjectKey) {
        self.deployments.remove(key);
        self.groups.remove(key);
    }
}

impl MemoryStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot, keeping UIDs and versions
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = StoreState::default();
        for obj in snapshot.deployments {
            state.last_version = state.last_version.max(obj.metadata.resource_version);
            state.deployments.insert(obj.key(), obj);
        }
        for group in snapshot.resource_groups {
            state.last_version = state.last_version.max(group.metadata.resource_version);
            state.groups.insert(group.key(), group);
        }
        Self {
            state: Mutex::new(state),
            watchers: Mutex::default(),
        }
    }

    /// Copy of all objects, sorted by key
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            deployments: state.deployments.values().cloned().collect(),
            resource_groups: state.groups.values().cloned().collect(),
        }
    }

    /// All deployments, sorted by key
    pub fn list(&self) -> Vec<BundleDeployment> {
        self.state().deployments.values().cloned().collect()
    }

    /// Create a deployment with a fresh UID at generation 1
    pub fn create(
        &self,
        key: &ObjectKey,
        spec: BundleDeploymentSpec,
    ) -> StoreResult<BundleDeployment> {
        let created = {
            let mut state = self.state();
            if state.deployments.contains_key(key) {
                return Err(StoreError::AlreadyExists {
                    kind: DEPLOYMENT_KIND,
                    key: key.clone(),
                });
            }

            let mut obj = BundleDeployment::new(key, spec);
            obj.metadata.uid = uuid::Uuid::new_v4().to_string();
            obj.metadata.generation = 1;
            obj.metadata.creation_timestamp = Some(Utc::now());
            obj.metadata.resource_version = state.next_version();
            state.deployments.insert(key.clone(), obj.clone());
            obj
        };

        log::debug!("Created {DEPLOYMENT_KIND} {key}");
        self.notify(key);
        Ok(created)
    }

    /// Replace the spec, bumping the generation when it changed
    pub fn update_spec(
        &self,
        key: &ObjectKey,
        spec: BundleDeploymentSpec,
    ) -> StoreResult<BundleDeployment> {
        let updated = {
            let mut state = self.state();
            let version = state.next_version();
            let obj = state
                .deployments
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound {
                    kind: DEPLOYMENT_KIND,
                    key: key.clone(),
                })?;
            if obj.spec == spec {
                return Ok(obj.clone());
            }
            obj.spec = spec;
            obj.metadata.generation += 1;
            obj.metadata.resource_version = version;
            obj.clone()
        };

        self.notify(key);
        Ok(updated)
    }

    /// Request deletion
    ///
    /// Objects without finalizers are removed immediately; otherwise the
    /// deletion timestamp is set and removal waits for the finalizers.
    /// Returns whether the object is already gone.
    pub fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        let removed = {
            let mut state = self.state();
            let version = state.next_version();
            let obj = state
                .deployments
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound {
                    kind: DEPLOYMENT_KIND,
                    key: key.clone(),
                })?;

            if obj.metadata.finalizers.is_empty() {
                state.remove(key);
                true
            } else {
                if obj.metadata.deletion_timestamp.is_none() {
                    obj.metadata.deletion_timestamp = Some(Utc::now());
                    obj.metadata.resource_version = version;
                }
                false
            }
        };

        self.notify(key);
        Ok(removed)
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: &ObjectKey) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|tx| tx.send(key.clone()).is_ok());
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, key: &ObjectKey) -> StoreResult<Option<BundleDeployment>> {
        Ok(self.state().deployments.get(key).cloned())
    }

    fn update(&self, obj: &BundleDeployment) -> StoreResult<Option<BundleDeployment>> {
        let key = obj.key();
        let updated = {
            let mut state = self.state();
            state.check_version(obj)?;
            let version = state.next_version();

            let current = state.current(&key)?.clone();
            let mut next = current.clone();
            next.metadata.finalizers = obj.metadata.finalizers.clone();
            next.metadata.labels = obj.metadata.labels.clone();
            if next.spec != obj.spec {
                next.spec = obj.spec.clone();
                next.metadata.generation += 1;
            }

            if next.is_terminating() && next.metadata.finalizers.is_empty() {
                state.remove(&key);
                log::debug!("Removed {DEPLOYMENT_KIND} {key} after its finalizers cleared");
                None
            } else {
                next.metadata.resource_version = version;
                state.deployments.insert(key.clone(), next.clone());
                Some(next)
            }
        };

        self.notify(&key);
        Ok(updated)
    }

    fn update_status(&self, obj: &BundleDeployment) -> StoreResult<BundleDeployment> {
        let key = obj.key();
        let updated = {
            let mut state = self.state();
            state.check_version(obj)?;
            let version = state.next_version();

            let mut next = state.current(&key)?.clone();
            next.status = obj.status.clone();
            next.metadata.resource_version = version;
            state.deployments.insert(key.clone(), next.clone());
            next
        };

        self.notify(&key);
        Ok(updated)
    }

    fn get_resource_group(&self, key: &ObjectKey) -> StoreResult<Option<ResourceGroup>> {
        Ok(self.state().groups.get(key).cloned())
    }

    fn create_resource_group(&self, group: &ResourceGroup) -> StoreResult<ResourceGroup> {
        let key = group.key();
        let created = {
            let mut state = self.state();
            if state.groups.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind: RESOURCE_GROUP_KIND,
                    key,
                });
            }
            let mut created = group.clone();
            created.metadata.uid = uuid::Uuid::new_v4().to_string();
            created.metadata.generation = 1;
            created.metadata.creation_timestamp = Some(Utc::now());
            created.metadata.resource_version = state.next_version();
            state.groups.insert(key.clone(), created.clone());
            created
        };

        self.notify(&key);
        Ok(created)
    }

    fn subscribe(&self) -> Receiver<ObjectKey> {
        let (tx, rx) = mpsc::channel();
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CLEANUP_FINALIZER;
    use deployer::InventoryScope;

    fn key() -> ObjectKey {
        ObjectKey::new("default", "demo")
    }

    fn spec(replicas: u32) -> BundleDeploymentSpec {
        BundleDeploymentSpec {
            replicas,
            release_bundle: "rapid".into(),
        }
    }

    #[test]
    fn test_create_assigns_identity() {
        let store = MemoryStore::new();
        let obj = store.create(&key(), spec(1)).unwrap();
        assert_eq!(obj.generation(), 1);
        assert!(!obj.metadata.uid.is_empty());
        assert!(obj.metadata.resource_version > 0);

        let other = store
            .create(&ObjectKey::new("default", "other"), spec(1))
            .unwrap();
        assert_ne!(obj.metadata.uid, other.metadata.uid);
    }

    #[test]
    fn test_create_duplicate() {
        let store = MemoryStore::new();
        store.create(&key(), spec(1)).unwrap();
        assert!(matches!(
            store.create(&key(), spec(2)),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_update_spec_bumps_generation_on_change_only() {
        let store = MemoryStore::new();
        store.create(&key(), spec(1)).unwrap();

        assert_eq!(store.update_spec(&key(), spec(1)).unwrap().generation(), 1);
        assert_eq!(store.update_spec(&key(), spec(3)).unwrap().generation(), 2);
    }

    #[test]
    fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let stale = store.create(&key(), spec(1)).unwrap();
        store.update_spec(&key(), spec(2)).unwrap();

        let err = store.update_status(&stale).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_update_status_leaves_spec() {
        let store = MemoryStore::new();
        let mut obj = store.create(&key(), spec(1)).unwrap();
        obj.spec.replicas = 9;
        obj.status.ready = true;

        let updated = store.update_status(&obj).unwrap();
        assert!(updated.status.ready);
        assert_eq!(updated.spec.replicas, 1);
        assert_eq!(updated.generation(), 1);
    }

    #[test]
    fn test_delete_without_finalizers_removes() {
        let store = MemoryStore::new();
        store.create(&key(), spec(1)).unwrap();
        assert!(store.delete(&key()).unwrap());
        assert!(store.get(&key()).unwrap().is_none());
    }

    #[test]
    fn test_delete_waits_for_finalizers() {
        let store = MemoryStore::new();
        let mut obj = store.create(&key(), spec(1)).unwrap();
        obj.metadata.finalizers.add(CLEANUP_FINALIZER);
        let obj = store.update(&obj).unwrap().unwrap();
        store
            .create_resource_group(&ResourceGroup::for_scope(&obj.inventory_scope()))
            .unwrap();

        assert!(!store.delete(&key()).unwrap());
        let mut terminating = store.get(&key()).unwrap().unwrap();
        assert!(terminating.is_terminating());

        terminating.metadata.finalizers.remove(CLEANUP_FINALIZER);
        assert!(store.update(&terminating).unwrap().is_none());
        assert!(store.get(&key()).unwrap().is_none());
        assert!(store.get_resource_group(&key()).unwrap().is_none());
    }

    #[test]
    fn test_resource_group_create_once() {
        let store = MemoryStore::new();
        let scope = InventoryScope::new(key(), "uid-1");
        let group = ResourceGroup::for_scope(&scope);

        store.create_resource_group(&group).unwrap();
        assert!(matches!(
            store.create_resource_group(&group),
            Err(StoreError::AlreadyExists { .. })
        ));
        let stored = store.get_resource_group(&key()).unwrap().unwrap();
        assert_eq!(stored.inventory_id(), Some("uid-1"));
    }

    #[test]
    fn test_subscribers_see_writes() {
        let store = MemoryStore::new();
        let events = store.subscribe();
        store.create(&key(), spec(1)).unwrap();
        store.update_spec(&key(), spec(2)).unwrap();

        let seen: Vec<_> = events.try_iter().collect();
        assert_eq!(seen, vec![key(), key()]);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_versions() {
        let store = MemoryStore::new();
        let obj = store.create(&key(), spec(4)).unwrap();

        let restored = MemoryStore::from_snapshot(store.snapshot());
        assert_eq!(restored.get(&key()).unwrap(), Some(obj.clone()));

        // Versions continue past the restored ones
        let next = restored.update_spec(&key(), spec(5)).unwrap();
        assert!(next.metadata.resource_version > obj.metadata.resource_version);
    }
}
