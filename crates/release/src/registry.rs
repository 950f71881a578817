//! Registry of release bundles, keyed by name.

use crate::builtin::{DEFAULT_TARGET, builtin_bundles};
use crate::bundle::ReleaseBundle;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File describing an on-disk registry
pub const REGISTRY_FILE: &str = "registry.toml";

/// Fixed mapping from bundle name to bundle content
///
/// A registry is built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    bundles: BTreeMap<String, ReleaseBundle>,
}

/// On-disk `registry.toml` layout
#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "bundle")]
    bundles: Vec<BundleEntry>,
}

#[derive(Debug, Deserialize)]
struct BundleEntry {
    name: String,
    path: PathBuf,
    #[serde(default = "default_target")]
    target: String,
}

fn default_target() -> String {
    DEFAULT_TARGET.to_string()
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `rapid` and `stable` bundles
    pub fn builtin() -> Self {
        let bundles = builtin_bundles()
            .into_iter()
            .map(|b| (b.name().to_string(), b))
            .collect();
        Self { bundles }
    }

    /// Load a registry from `<dir>/registry.toml`
    ///
    /// ```toml
    /// [[bundle]]
    /// name = "rapid"
    /// path = "rapid"      # relative to the registry directory
    /// target = "web"      # optional, defaults to "web"
    /// ```
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(REGISTRY_FILE);
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let file: RegistryFile = toml::from_str(&content).map_err(|e| Error::InvalidRegistry {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut registry = Self::new();
        for entry in file.bundles {
            let root = dir.join(&entry.path);
            if !root.is_dir() {
                return Err(Error::MissingBundleDir {
                    name: entry.name,
                    path: root,
                });
            }
            registry.insert(ReleaseBundle::from_dir(entry.name, entry.target, root))?;
        }

        log::debug!(
            "Loaded {} release bundles from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Register a bundle, rejecting duplicate names
    pub fn insert(&mut self, bundle: ReleaseBundle) -> Result<()> {
        if self.bundles.contains_key(bundle.name()) {
            return Err(Error::DuplicateBundle(bundle.name().to_string()));
        }
        self.bundles.insert(bundle.name().to_string(), bundle);
        Ok(())
    }

    /// Look up a bundle by name
    pub fn get(&self, name: &str) -> Option<&ReleaseBundle> {
        self.bundles.get(name)
    }

    /// Known bundle names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    /// Registered bundles, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &ReleaseBundle> {
        self.bundles.values()
    }

    /// Number of registered bundles
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether no bundle is registered
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
