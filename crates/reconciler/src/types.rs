//! The BundleDeployment object model.

use chrono::{DateTime, Utc};
use deployer::{InventoryScope, ObjectKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer that blocks removal until the deployment has been destroyed
pub const CLEANUP_FINALIZER: &str = "bundle.deploy/deployment-cleanup";

/// Ordered set of finalizer tokens
///
/// `add` and `remove` report whether the set changed, so callers only
/// persist real mutations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Finalizers(Vec<String>);

impl Finalizers {
    /// No finalizers
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `token` is present
    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// Add `token`; returns `false` when it was already present
    pub fn add(&mut self, token: &str) -> bool {
        if self.contains(token) {
            return false;
        }
        self.0.push(token.to_string());
        true
    }

    /// Remove `token`; returns `false` when it was absent
    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| t != token);
        self.0.len() != before
    }

    /// Whether no finalizer is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of finalizers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Finalizers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Finalizers {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut finalizers = Self::new();
        for token in iter {
            let token = token.into();
            finalizers.add(&token);
        }
        finalizers
    }
}

/// Identity and lifecycle metadata maintained by the object store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Namespace of the object
    pub namespace: String,
    /// Name, unique within the namespace
    pub name: String,

    /// Unique, immutable id assigned at creation
    #[serde(default)]
    pub uid: String,

    /// Bumped on every spec change
    #[serde(default)]
    pub generation: i64,

    /// Bumped on every write; stale writes are rejected
    #[serde(default)]
    pub resource_version: u64,

    /// Set by the store on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set when deletion was requested; the object is terminating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Tokens that block physical deletion
    #[serde(default, skip_serializing_if = "Finalizers::is_empty")]
    pub finalizers: Finalizers,

    /// Arbitrary labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a not-yet-stored object
    pub fn new(key: &ObjectKey) -> Self {
        Self {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            ..Self::default()
        }
    }

    /// The object's `namespace/name`
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Whether deletion was requested
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Desired state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentSpec {
    /// Desired replica count of the target Deployment
    #[serde(default)]
    pub replicas: u32,
    /// Name of the release bundle to deploy
    #[serde(default)]
    pub release_bundle: String,
}

/// Observed state, written only by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentStatus {
    /// Generation of the last successful apply
    #[serde(default)]
    pub observed_generation: i64,
    /// Bundle checksum of the last successful apply
    #[serde(default)]
    pub last_applied_release_checksum: String,
    /// Whether the last apply succeeded
    #[serde(default)]
    pub ready: bool,
}

/// A release bundle deployed with a replica count
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BundleDeployment {
    /// Identity and lifecycle metadata
    pub metadata: ObjectMeta,
    /// Desired state
    #[serde(default)]
    pub spec: BundleDeploymentSpec,
    /// Observed state, written by the reconciler
    #[serde(default)]
    pub status: BundleDeploymentStatus,
}

impl BundleDeployment {
    /// A not-yet-stored object with `spec`
    pub fn new(key: &ObjectKey, spec: BundleDeploymentSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            spec,
            status: BundleDeploymentStatus::default(),
        }
    }

    /// The object's `namespace/name`
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Current spec generation
    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    /// Whether deletion was requested
    pub fn is_terminating(&self) -> bool {
        self.metadata.is_terminating()
    }

    /// Inventory this deployment's resources are tracked under
    ///
    /// The object key names the ResourceGroup; the UID is the inventory id,
    /// so a deleted and recreated object never adopts old resources.
    pub fn inventory_scope(&self) -> InventoryScope {
        InventoryScope::new(self.key(), self.metadata.uid.clone())
    }
}

/// Companion inventory-tracking object, created once per deployment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Identity metadata; the labels carry the inventory id
    pub metadata: ObjectMeta,
}

impl ResourceGroup {
    /// A ResourceGroup at the scope's key, labeled with its inventory id
    pub fn for_scope(scope: &InventoryScope) -> Self {
        let mut metadata = ObjectMeta::new(&scope.key);
        metadata.labels = scope.labels();
        Self { metadata }
    }

    /// The group's `namespace/name`
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Inventory id from the group's labels
    pub fn inventory_id(&self) -> Option<&str> {
        self.metadata
            .labels
            .get(deployer::INVENTORY_LABEL)
            .map(String::as_str)
    }
}
