//! On-disk object store: a JSON snapshot of every BundleDeployment and
//! ResourceGroup, loaded into a [`MemoryStore`] for the duration of a
//! command and written back afterwards.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reconciler::{MemoryStore, Snapshot};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    version: u32,
    last_updated: DateTime<Utc>,
    #[serde(flatten)]
    snapshot: Snapshot,
}

/// JSON state file backing the object store
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store, or an empty one if the file doesn't exist
    pub fn load(&self) -> Result<MemoryStore> {
        if !self.path.exists() {
            log::debug!("State file does not exist, starting empty");
            return Ok(MemoryStore::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let document: StateDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;
        if document.version != STATE_VERSION {
            bail!(
                "Unsupported state file version {} in {}",
                document.version,
                self.path.display()
            );
        }

        log::debug!(
            "Loaded {} object(s) from {}",
            document.snapshot.deployments.len(),
            self.path.display()
        );
        Ok(MemoryStore::from_snapshot(document.snapshot))
    }

    pub fn save(&self, store: &MemoryStore) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let document = StateDocument {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            snapshot: store.snapshot(),
        };
        let content =
            serde_json::to_string_pretty(&document).context("Failed to serialize state")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        log::debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}
