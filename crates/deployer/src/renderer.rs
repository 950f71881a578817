//! Overlay renderers: turn a staged kustomization directory into manifests.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::process::{Invocation, run};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Kustomization file every staged directory contains
pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// Renders a staged kustomization directory into a multi-document manifest
pub trait Renderer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Render the kustomization rooted at `dir`
    fn render(&self, dir: &Path, cancel: &CancelToken) -> Result<String>;
}

/// Renders with `kubectl kustomize`
#[derive(Debug, Clone)]
pub struct KustomizeRenderer {
    kubectl: PathBuf,
}

impl KustomizeRenderer {
    /// Use the `kubectl` binary at `kubectl`
    pub fn new(kubectl: impl Into<PathBuf>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }
}

impl Default for KustomizeRenderer {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl Renderer for KustomizeRenderer {
    fn name(&self) -> &'static str {
        "kustomize"
    }

    fn render(&self, dir: &Path, cancel: &CancelToken) -> Result<String> {
        let invocation = Invocation::new(&self.kubectl)
            .arg("kustomize")
            .current_dir(dir);
        Ok(run(&invocation, cancel)?.stdout)
    }
}

/// In-process renderer for the kustomize subset release bundles use
///
/// Supports `resources` (files, multi-document allowed), `namePrefix` and
/// `patchesStrategicMerge`. Patches are matched on `apiVersion`, `kind` and
/// `metadata.name` before the prefix is applied. Mappings merge
/// recursively; sequences and scalars in a patch replace the original.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayRenderer;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Kustomization {
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    name_prefix: Option<String>,
    #[serde(default)]
    patches_strategic_merge: Vec<String>,
}

impl Renderer for OverlayRenderer {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn render(&self, dir: &Path, cancel: &CancelToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                program: self.name().to_string(),
                timed_out: cancel.timed_out(),
            });
        }

        let kustomization_path = dir.join(KUSTOMIZATION_FILE);
        let content = read(&kustomization_path)?;
        let kustomization: Kustomization = serde_yaml::from_str(&content)
            .map_err(|e| Error::yaml(kustomization_path.display().to_string(), e))?;

        let mut documents = Vec::new();
        for resource in &kustomization.resources {
            documents.extend(read_documents(&dir.join(resource))?);
        }

        for patch_file in &kustomization.patches_strategic_merge {
            for patch in read_documents(&dir.join(patch_file))? {
                let id = resource_id(&patch).ok_or_else(|| {
                    Error::Render(format!(
                        "patch {patch_file} lacks apiVersion, kind or metadata.name"
                    ))
                })?;
                let target = documents
                    .iter_mut()
                    .find(|doc| resource_id(doc).as_ref() == Some(&id))
                    .ok_or_else(|| {
                        Error::Render(format!(
                            "patch {patch_file} targets {}/{} {:?}, which is not in the bundle",
                            id.0, id.1, id.2
                        ))
                    })?;
                merge(target, patch);
            }
        }

        if let Some(prefix) = &kustomization.name_prefix {
            for doc in &mut documents {
                prefix_name(doc, prefix);
            }
        }

        let rendered = documents
            .iter()
            .map(serde_yaml::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::yaml("rendered manifest", e))?;
        Ok(rendered.join("---\n"))
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Parse every non-empty document in a YAML stream
fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let content = read(path)?;
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = Value::deserialize(document)
            .map_err(|e| Error::yaml(path.display().to_string(), e))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// `(apiVersion, kind, metadata.name)` of a resource
fn resource_id(value: &Value) -> Option<(String, String, String)> {
    let api_version = value.get("apiVersion")?.as_str()?;
    let kind = value.get("kind")?.as_str()?;
    let name = value.get("metadata")?.get("name")?.as_str()?;
    Some((api_version.to_string(), kind.to_string(), name.to_string()))
}

fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Mapping(base), Value::Mapping(patch)) => merge_mapping(base, patch),
        (base, patch) => *base = patch,
    }
}

fn merge_mapping(base: &mut Mapping, patch: Mapping) {
    for (key, value) in patch {
        match base.get_mut(&key) {
            Some(existing) => merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

fn prefix_name(doc: &mut Value, prefix: &str) {
    let Some(Value::Mapping(metadata)) = doc.get_mut("metadata") else {
        return;
    };
    let key = Value::from("name");
    if let Some(Value::String(name)) = metadata.get(&key) {
        let prefixed = format!("{prefix}{name}");
        metadata.insert(key, Value::from(prefixed));
    }
}
