//! Manifest compiler: release bundle + overrides -> ready-to-apply manifests.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::renderer::{KUSTOMIZATION_FILE, Renderer};
use release::ReleaseBundle;
use serde_yaml::{Mapping, Value};
use std::env;
use std::fs;
use std::path::Path;

/// Prefix of per-compile staging directories under the system temp dir
const STAGING_PREFIX: &str = "manifest-staging-";

/// One override applied on top of a release bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOption {
    /// Prefix every resource name with `<prefix>-`
    NamePrefix(String),
    /// Strategic-merge patch identifying its target by apiVersion/kind/name
    Patch(String),
    /// Override the replica count of the bundle's target Deployment
    Replicas(u32),
}

/// Accumulates overrides, then compiles a bundle in an isolated staging area
#[derive(Debug, Clone)]
pub struct ManifestBuilder<'a> {
    bundle: &'a ReleaseBundle,
    name_prefix: Option<String>,
    patches: Vec<String>,
}

impl<'a> ManifestBuilder<'a> {
    /// Start with no overrides
    pub fn new(bundle: &'a ReleaseBundle) -> Self {
        Self {
            bundle,
            name_prefix: None,
            patches: Vec::new(),
        }
    }

    /// Apply a single option
    pub fn option(self, option: ManifestOption) -> Self {
        match option {
            ManifestOption::NamePrefix(prefix) => self.name_prefix(&prefix),
            ManifestOption::Patch(patch) => self.patch(patch),
            ManifestOption::Replicas(replicas) => self.replicas_patch(replicas),
        }
    }

    /// Prefix every generated resource name with `<prefix>-`
    pub fn name_prefix(mut self, prefix: &str) -> Self {
        self.name_prefix = Some(format!("{prefix}-"));
        self
    }

    /// Append a strategic-merge patch
    pub fn patch(mut self, patch: impl Into<String>) -> Self {
        self.patches.push(patch.into());
        self
    }

    /// Append a patch overriding the target Deployment's replica count
    pub fn replicas_patch(self, replicas: u32) -> Self {
        let patch = replicas_patch(self.bundle.target_name(), replicas);
        self.patch(patch)
    }

    /// Patches in the order they will be staged
    pub fn patches(&self) -> &[String] {
        &self.patches
    }

    /// Render the bundle with all overrides applied
    ///
    /// The bundle is extracted into a fresh staging directory that is removed
    /// when this call returns, whether it succeeds, fails or is cancelled.
    pub fn compile(&self, renderer: &dyn Renderer, cancel: &CancelToken) -> Result<String> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir()
            .map_err(|e| Error::io(env::temp_dir(), e))?;

        self.stage(staging.path())?;

        log::debug!(
            "Rendering bundle {} with {} in {}",
            self.bundle.name(),
            renderer.name(),
            staging.path().display()
        );
        let rendered = renderer.render(staging.path(), cancel);

        if let Err(e) = staging.close() {
            log::warn!("Failed to remove staging directory: {e}");
        }
        rendered
    }

    /// Extract the bundle and write override directives into `dir`
    fn stage(&self, dir: &Path) -> Result<()> {
        self.bundle.write_to(dir)?;

        let kustomization_path = dir.join(KUSTOMIZATION_FILE);
        let content =
            fs::read_to_string(&kustomization_path).map_err(|e| Error::io(&kustomization_path, e))?;
        let mut kustomization: Mapping = match serde_yaml::from_str(&content)
            .map_err(|e| Error::yaml(KUSTOMIZATION_FILE, e))?
        {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => {
                return Err(Error::Render(format!(
                    "{KUSTOMIZATION_FILE} of bundle {} is not a mapping",
                    self.bundle.name()
                )));
            }
        };

        if let Some(prefix) = &self.name_prefix {
            let previous = kustomization.insert("namePrefix".into(), prefix.as_str().into());
            if previous.is_some() {
                log::warn!(
                    "Bundle {} declares its own namePrefix; overriding with {prefix}",
                    self.bundle.name()
                );
            }
        }

        if !self.patches.is_empty() {
            let mut references = match kustomization.remove("patchesStrategicMerge") {
                Some(Value::Sequence(existing)) => existing,
                _ => Vec::new(),
            };
            for (index, patch) in self.patches.iter().enumerate() {
                let file_name = format!("patch-{index}.yaml");
                let patch_path = dir.join(&file_name);
                fs::write(&patch_path, patch).map_err(|e| Error::io(&patch_path, e))?;
                references.push(file_name.into());
            }
            kustomization.insert("patchesStrategicMerge".into(), Value::Sequence(references));
        }

        let updated = serde_yaml::to_string(&kustomization)
            .map_err(|e| Error::yaml(KUSTOMIZATION_FILE, e))?;
        fs::write(&kustomization_path, updated).map_err(|e| Error::io(&kustomization_path, e))?;
        Ok(())
    }
}

/// Compile `bundle` with `options` applied in order
pub fn build_manifests(
    bundle: &ReleaseBundle,
    options: impl IntoIterator<Item = ManifestOption>,
    renderer: &dyn Renderer,
    cancel: &CancelToken,
) -> Result<String> {
    options
        .into_iter()
        .fold(ManifestBuilder::new(bundle), ManifestBuilder::option)
        .compile(renderer, cancel)
}

/// Strategic-merge patch setting `spec.replicas` of Deployment `target`
pub fn replicas_patch(target: &str, replicas: u32) -> String {
    format!(
        "apiVersion: apps/v1
kind: Deployment
metadata:
  name: {target}
spec:
  replicas: {replicas}
"
    )
}
