//! Inventory identities: what a deployment's resources are tracked under.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Label carrying the inventory id on the ResourceGroup object
pub const INVENTORY_LABEL: &str = "cli-utils.sigs.k8s.io/inventory-id";

/// Namespace used when a key is given without one
pub const DEFAULT_NAMESPACE: &str = "default";

const RESOURCE_GROUP_API_VERSION: &str = "kpt.dev/v1alpha1";
const RESOURCE_GROUP_KIND: &str = "ResourceGroup";

/// Namespace-qualified object name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace, `default` when not given
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for `namespace/name`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    /// Parse `namespace/name`, or a bare `name` in the default namespace
    fn from_str(s: &str) -> Result<Self> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (DEFAULT_NAMESPACE, s),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(Error::InvalidKey(s.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}

/// Identity under which a deployment's resources are applied and destroyed
///
/// `key` names the ResourceGroup inventory object; `id` is the unique
/// inventory id. Both are derived from the owning object, so re-deriving
/// the scope always yields the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryScope {
    /// Object owning the inventory
    pub key: ObjectKey,
    /// Inventory id, stable for the object's lifetime
    pub id: String,
}

impl InventoryScope {
    /// Scope for `key` tracked under `id`
    pub fn new(key: ObjectKey, id: impl Into<String>) -> Self {
        Self { key, id: id.into() }
    }

    /// Labels put on the inventory object
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(INVENTORY_LABEL.to_string(), self.id.clone())])
    }
}

impl fmt::Display for InventoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.id)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceGroupManifest<'a> {
    api_version: &'a str,
    kind: &'a str,
    metadata: ResourceGroupMeta<'a>,
}

#[derive(Serialize)]
struct ResourceGroupMeta<'a> {
    name: &'a str,
    namespace: &'a str,
    labels: BTreeMap<String, String>,
}

/// YAML for the kpt ResourceGroup inventory object of `scope`
pub fn resource_group_manifest(scope: &InventoryScope) -> Result<String> {
    let manifest = ResourceGroupManifest {
        api_version: RESOURCE_GROUP_API_VERSION,
        kind: RESOURCE_GROUP_KIND,
        metadata: ResourceGroupMeta {
            name: &scope.key.name,
            namespace: &scope.key.namespace,
            labels: scope.labels(),
        },
    };
    serde_yaml::to_string(&manifest).map_err(|e| Error::yaml("ResourceGroup manifest", e))
}
