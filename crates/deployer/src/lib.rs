//! # Deployer
//!
//! Turns release bundles into concrete manifests and hands them to a
//! deployment executor.
//!
//! - [`ManifestBuilder`] stages a [`release::ReleaseBundle`] with a name
//!   prefix and strategic-merge patches, then runs a [`Renderer`] over it
//! - [`Executor`] applies or destroys manifests under an [`InventoryScope`]
//! - [`CancelToken`] bounds every blocking call; external processes are
//!   killed when it fires
//!
//! ## Example
//!
//! ```
//! use deployer::{CancelToken, ManifestBuilder, OverlayRenderer};
//! use release::Registry;
//!
//! let registry = Registry::builtin();
//! let manifests = ManifestBuilder::new(registry.get("rapid").unwrap())
//!     .name_prefix("frontend")
//!     .replicas_patch(3)
//!     .compile(&OverlayRenderer, &CancelToken::new())?;
//!
//! assert!(manifests.contains("frontend-web"));
//! # Ok::<(), deployer::Error>(())
//! ```
//!
//! ## Provider Traits
//!
//! - [`Renderer`]: `kubectl kustomize` ([`KustomizeRenderer`]) or the
//!   in-process [`OverlayRenderer`]
//! - [`Executor`]: `kpt live` ([`KptExecutor`]) or the recording
//!   [`MockExecutor`]

#![warn(missing_docs)]

pub mod cancel;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod process;
pub mod renderer;

pub use cancel::CancelToken;
pub use compiler::{ManifestBuilder, ManifestOption, build_manifests, replicas_patch};
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorCall, KptExecutor, MockExecutor};
pub use inventory::{
    DEFAULT_NAMESPACE, INVENTORY_LABEL, InventoryScope, ObjectKey, resource_group_manifest,
};
pub use process::{CommandOutput, Invocation};
pub use renderer::{KUSTOMIZATION_FILE, KustomizeRenderer, OverlayRenderer, Renderer};
