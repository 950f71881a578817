//! The reconciliation engine.
//!
//! One call to [`Reconciler::reconcile`] is a complete evaluate-and-correct
//! pass over a single object. Calls are idempotent: reconciling an object
//! whose observed state already matches is a no-op. Callers must not run two
//! reconciles for the same key at once; different keys may run in parallel.

use crate::error::{Error, Result};
use crate::store::{ObjectStore, StoreError};
use crate::types::{BundleDeployment, CLEANUP_FINALIZER, ResourceGroup};
use deployer::{CancelToken, Executor, ManifestBuilder, ObjectKey, Renderer};
use release::Registry;
use std::fmt;
use std::sync::Arc;

/// What a reconcile pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The object no longer exists
    Missing,
    /// The cleanup finalizer was added; work continues on the next pass
    FinalizerAdded,
    /// Resources were destroyed and the finalizer removed
    CleanedUp,
    /// Terminating with nothing left for this controller to do
    Terminating,
    /// Observed state already matches
    UpToDate,
    /// Manifests were applied and status recorded
    Applied {
        /// Checksum of the bundle that was applied
        checksum: String,
    },
}

impl Outcome {
    /// Whether the pass changed the object or the cluster
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::FinalizerAdded | Self::CleanedUp | Self::Applied { .. }
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "not found"),
            Self::FinalizerAdded => write!(f, "finalizer added"),
            Self::CleanedUp => write!(f, "cleaned up"),
            Self::Terminating => write!(f, "terminating"),
            Self::UpToDate => write!(f, "up to date"),
            Self::Applied { checksum } => {
                write!(f, "applied {}", checksum.get(..12).unwrap_or(checksum))
            }
        }
    }
}

/// Whether `obj` must be redeployed given the current bundle checksum
///
/// True when the spec changed since the last successful apply or the
/// bundle's content no longer matches what was applied.
pub fn needs_reapply(obj: &BundleDeployment, checksum: &str) -> bool {
    obj.metadata.generation != obj.status.observed_generation
        || obj.status.last_applied_release_checksum != checksum
}

/// Log whatever the tool printed before failing
fn log_transcript(err: Error) -> Error {
    if let Some(transcript) = err.transcript() {
        log::info!("Output for {} before failure:\n{}", err.key(), transcript.trim_end());
    }
    err
}

/// Drives BundleDeployments toward their desired state
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    registry: Arc<Registry>,
    renderer: Arc<dyn Renderer>,
    executor: Arc<dyn Executor>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("bundles", &self.registry.names().collect::<Vec<_>>())
            .field("renderer", &self.renderer.name())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build a reconciler over a store and deployment tooling
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<Registry>,
        renderer: Arc<dyn Renderer>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            store,
            registry,
            renderer,
            executor,
        }
    }

    /// The store objects are read from and written to
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run one reconcile pass for `key`
    ///
    /// A finalizer change is persisted and ends the pass; the write triggers
    /// the next one. Any failure leaves status untouched.
    pub fn reconcile(&self, key: &ObjectKey, cancel: &CancelToken) -> Result<Outcome> {
        log::debug!("Reconciling {key}");
        let outcome = self.reconcile_inner(key, cancel);
        match &outcome {
            Ok(outcome) => log::debug!("Reconciled {key}: {outcome}"),
            Err(e) => log::debug!("Reconcile of {key} failed: {e}"),
        }
        outcome
    }

    fn reconcile_inner(&self, key: &ObjectKey, cancel: &CancelToken) -> Result<Outcome> {
        let Some(obj) = self
            .store
            .get(key)
            .map_err(|e| Error::store("get", key, e))?
        else {
            return Ok(Outcome::Missing);
        };

        if obj.is_terminating() {
            return self.finalize(obj, cancel);
        }

        let mut obj = obj;
        if obj.metadata.finalizers.add(CLEANUP_FINALIZER) {
            self.store
                .update(&obj)
                .map_err(|e| Error::store("add finalizer to", key, e))?;
            log::info!("Added finalizer to {key}");
            return Ok(Outcome::FinalizerAdded);
        }

        self.ensure_resource_group(&obj)?;
        self.deploy(obj, cancel)
    }

    /// Destroy the object's resources, then release it
    fn finalize(&self, mut obj: BundleDeployment, cancel: &CancelToken) -> Result<Outcome> {
        let key = obj.key();
        if !obj.metadata.finalizers.contains(CLEANUP_FINALIZER) {
            return Ok(Outcome::Terminating);
        }

        let scope = obj.inventory_scope();
        let transcript = self
            .executor
            .destroy(&scope, cancel)
            .map_err(|source| {
                log_transcript(Error::Destroy {
                    key: key.clone(),
                    source,
                })
            })?;
        log::info!("Destroyed {scope}");
        if !transcript.trim().is_empty() {
            log::debug!("{}", transcript.trim_end());
        }

        obj.metadata.finalizers.remove(CLEANUP_FINALIZER);
        self.store
            .update(&obj)
            .map_err(|e| Error::store("remove finalizer from", &key, e))?;
        log::info!("Removed finalizer from {key}");
        Ok(Outcome::CleanedUp)
    }

    /// Create the inventory-tracking ResourceGroup unless it exists
    fn ensure_resource_group(&self, obj: &BundleDeployment) -> Result<()> {
        let key = obj.key();
        let existing = self
            .store
            .get_resource_group(&key)
            .map_err(|e| Error::store("get resource group", &key, e))?;
        if existing.is_some() {
            return Ok(());
        }

        let group = ResourceGroup::for_scope(&obj.inventory_scope());
        match self.store.create_resource_group(&group) {
            Ok(_) => {
                log::info!("Created resource group {key}");
                Ok(())
            }
            // Created between our read and write; leave it untouched
            Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(Error::store("create resource group", &key, e)),
        }
    }

    fn deploy(&self, mut obj: BundleDeployment, cancel: &CancelToken) -> Result<Outcome> {
        let key = obj.key();
        let bundle_name = obj.spec.release_bundle.clone();
        let bundle = self
            .registry
            .get(&bundle_name)
            .ok_or_else(|| Error::UnknownBundle {
                key: key.clone(),
                bundle: bundle_name.clone(),
            })?;

        let checksum = bundle.checksum().map_err(|source| Error::Checksum {
            key: key.clone(),
            bundle: bundle_name.clone(),
            source,
        })?;

        if !needs_reapply(&obj, &checksum) {
            log::info!("{key} is up to date");
            return Ok(Outcome::UpToDate);
        }

        let manifests = ManifestBuilder::new(bundle)
            .name_prefix(&obj.metadata.name)
            .replicas_patch(obj.spec.replicas)
            .compile(self.renderer.as_ref(), cancel)
            .map_err(|source| Error::Compile {
                key: key.clone(),
                source,
            })?;

        let scope = obj.inventory_scope();
        let transcript = self
            .executor
            .apply(&scope, &manifests, cancel)
            .map_err(|source| {
                log_transcript(Error::Apply {
                    key: key.clone(),
                    source,
                })
            })?;
        log::info!(
            "Applied bundle {bundle_name} to {key} (generation {})",
            obj.generation()
        );
        if !transcript.trim().is_empty() {
            log::debug!("{}", transcript.trim_end());
        }

        obj.status.observed_generation = obj.metadata.generation;
        obj.status.last_applied_release_checksum.clone_from(&checksum);
        obj.status.ready = true;
        self.store
            .update_status(&obj)
            .map_err(|e| Error::store("update status of", &key, e))?;

        Ok(Outcome::Applied { checksum })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BundleDeploymentSpec;

    fn object(generation: i64, observed: i64, checksum: &str) -> BundleDeployment {
        let mut obj = BundleDeployment::new(
            &ObjectKey::new("default", "demo"),
            BundleDeploymentSpec {
                replicas: 1,
                release_bundle: "rapid".into(),
            },
        );
        obj.metadata.generation = generation;
        obj.status.observed_generation = observed;
        obj.status.last_applied_release_checksum = checksum.into();
        obj
    }

    #[test]
    fn test_needs_reapply_unchanged() {
        assert!(!needs_reapply(&object(3, 3, "abc"), "abc"));
    }

    #[test]
    fn test_needs_reapply_on_generation_change() {
        assert!(needs_reapply(&object(4, 3, "abc"), "abc"));
    }

    #[test]
    fn test_needs_reapply_on_checksum_change() {
        assert!(needs_reapply(&object(3, 3, "abc"), "def"));
    }

    #[test]
    fn test_needs_reapply_never_applied() {
        assert!(needs_reapply(&object(1, 0, ""), "abc"));
    }

    #[test]
    fn test_outcome_display() {
        let applied = Outcome::Applied {
            checksum: "0123456789abcdef".into(),
        };
        assert_eq!(applied.to_string(), "applied 0123456789ab");
        assert!(applied.is_change());
        assert!(!Outcome::UpToDate.is_change());
        assert_eq!(Outcome::Missing.to_string(), "not found");
    }
}
