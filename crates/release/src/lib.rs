//! # Release
//!
//! Immutable, named release bundles of manifest templates.
//!
//! A [`ReleaseBundle`] is a tree of kustomize-style manifest files plus the
//! name of the Deployment that per-deployment overrides (such as the replica
//! count) are patched onto. Bundles are looked up by name in a [`Registry`],
//! which is resolved once at startup either from the built-in bundles
//! (`rapid`, `stable`) or from a directory on disk.
//!
//! ## Example
//!
//! ```
//! use release::Registry;
//!
//! let registry = Registry::builtin();
//! let rapid = registry.get("rapid").unwrap();
//!
//! // Checksums depend only on relative paths and file contents
//! assert_eq!(rapid.checksum()?, rapid.checksum()?);
//! # Ok::<(), release::Error>(())
//! ```

#![warn(missing_docs)]

mod builtin;
mod bundle;
mod error;
mod registry;

pub use builtin::{DEFAULT_TARGET, RAPID, STABLE, builtin_bundles};
pub use bundle::ReleaseBundle;
pub use error::{Error, Result};
pub use registry::{REGISTRY_FILE, Registry};
