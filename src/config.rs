//! bundlectl configuration
//!
//! Read from `<config dir>/bundlectl/config.toml` unless `--config` names
//! another file. Every field is optional.
//!
//! ```toml
//! bundles_dir = "~/releases"
//! state_file = "~/.local/share/bundlectl/state.json"
//! renderer = "builtin"
//! kubectl = "/usr/local/bin/kubectl"
//! kpt = "kpt"
//! timeout_secs = 300
//! jobs = 4
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! backoff_factor = 2.0
//! ```

use anyhow::{Context, Result, bail};
use deployer::{KustomizeRenderer, OverlayRenderer, Renderer};
use reconciler::RequeuePolicy;
use release::Registry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const APP_DIR: &str = "bundlectl";

/// Which renderer compiles manifests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// `kubectl kustomize`
    #[default]
    Kustomize,
    /// In-process overlay renderer
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory with `registry.toml`; built-in bundles when unset
    pub bundles_dir: Option<String>,
    /// JSON state file; `<data dir>/bundlectl/state.json` when unset
    pub state_file: Option<String>,
    pub renderer: RendererKind,
    pub kubectl: String,
    pub kpt: String,
    /// Deadline for a single reconcile pass
    pub timeout_secs: u64,
    /// Reconciles running at once
    pub jobs: usize,
    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bundles_dir: None,
            state_file: None,
            renderer: RendererKind::default(),
            kubectl: "kubectl".to_string(),
            kpt: "kpt".to_string(),
            timeout_secs: 300,
            jobs: 4,
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path`, or from the default location
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !path.exists() {
            if explicit {
                bail!("Config file not found: {}", path.display());
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolved state file path
    pub fn state_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.state_file {
            return Ok(expand(path));
        }
        let dir = dirs::data_dir().context("Could not determine data directory")?;
        Ok(dir.join(APP_DIR).join("state.json"))
    }

    /// Bundle registry: `bundles_dir` if configured, else the built-ins
    pub fn registry(&self) -> Result<Registry> {
        match &self.bundles_dir {
            Some(dir) => {
                let dir = expand(dir);
                Registry::load_dir(&dir)
                    .with_context(|| format!("Failed to load bundles from {}", dir.display()))
            }
            None => Ok(Registry::builtin()),
        }
    }

    pub fn renderer(&self, kind: RendererKind) -> Arc<dyn Renderer> {
        match kind {
            RendererKind::Kustomize => Arc::new(KustomizeRenderer::new(expand(&self.kubectl))),
            RendererKind::Builtin => Arc::new(OverlayRenderer),
        }
    }

    pub fn kpt_path(&self) -> PathBuf {
        expand(&self.kpt)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

/// Expand `~` and environment variables in a path
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.renderer, RendererKind::Kustomize);
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.jobs, 4);

        let policy = config.requeue_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "renderer = \"builtin\"\njobs = 8\n\n[retry]\nmax_attempts = 2\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.renderer, RendererKind::Builtin);
        assert_eq!(config.jobs, 8);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.kpt, "kpt");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "renderer = \"helm\"\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[test]
    fn test_state_file_is_expanded() {
        let config = Config {
            state_file: Some("~/bundlectl/state.json".into()),
            ..Config::default()
        };
        let path = config.state_path().unwrap();
        assert!(path.ends_with("bundlectl/state.json"));
        if dirs::home_dir().is_some() {
            assert!(!path.to_string_lossy().starts_with('~'));
        }
    }

    #[test]
    fn test_builtin_registry_by_default() {
        let registry = Config::default().registry().unwrap();
        assert!(registry.get("rapid").is_some());
        assert!(registry.get("stable").is_some());
    }
}
