//! # Reconciler
//!
//! Idempotent lifecycle management for `BundleDeployment` objects.
//!
//! A [`Reconciler`] takes one object at a time through its state machine:
//!
//! - **Missing**: nothing to do
//! - **Needs finalizer**: add [`CLEANUP_FINALIZER`] and stop
//! - **Active**: ensure the inventory [`ResourceGroup`] exists, then apply
//!   the release bundle when [`needs_reapply`] says the spec or bundle
//!   content changed since the last apply
//! - **Terminating**: destroy everything in the object's inventory scope,
//!   then drop the finalizer so the store can remove the object
//!
//! The [`Controller`] feeds keys from the store's watch channel through a
//! deduplicating queue and retries failures with exponential backoff.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use deployer::{CancelToken, MockExecutor, ObjectKey, OverlayRenderer};
//! use reconciler::{BundleDeploymentSpec, Controller, MemoryStore, Reconciler};
//! use release::Registry;
//!
//! let store = Arc::new(MemoryStore::new());
//! let executor = MockExecutor::new();
//! let reconciler = Reconciler::new(
//!     store.clone(),
//!     Arc::new(Registry::builtin()),
//!     Arc::new(OverlayRenderer),
//!     Arc::new(executor.clone()),
//! );
//! let mut controller = Controller::new(reconciler, 2).unwrap();
//!
//! let key = ObjectKey::new("default", "frontend");
//! store.create(&key, BundleDeploymentSpec { replicas: 2, release_bundle: "rapid".into() })?;
//!
//! let summary = controller.run_until_idle(&CancelToken::new());
//! assert!(summary.is_success());
//! assert_eq!(executor.apply_count(), 1);
//! # Ok::<(), reconciler::StoreError>(())
//! ```

#![warn(missing_docs)]

mod controller;
mod engine;
mod error;
mod store;
mod types;

pub use controller::{Controller, ControllerSummary, RequeuePolicy};
pub use engine::{Outcome, Reconciler, needs_reapply};
pub use error::{Error, ErrorCategory, Result};
pub use store::{MemoryStore, ObjectStore, Snapshot, StoreError, StoreResult};
pub use types::{
    BundleDeployment, BundleDeploymentSpec, BundleDeploymentStatus, CLEANUP_FINALIZER, Finalizers,
    ObjectMeta, ResourceGroup,
};
