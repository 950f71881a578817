//! Deployment executors: apply and destroy manifests under an inventory scope.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::inventory::{InventoryScope, resource_group_manifest};
use crate::process::{Invocation, run};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Makes live cluster state match a manifest, tracked under an inventory
///
/// Both calls block until the underlying tool finishes, return its
/// transcript on success, and fail with the captured diagnostics otherwise.
pub trait Executor: Send + Sync {
    /// Converge the resources tracked under `scope` to `manifests`
    ///
    /// Safe to repeat with the same or an updated manifest; resources that
    /// dropped out of the manifest are pruned.
    fn apply(
        &self,
        scope: &InventoryScope,
        manifests: &str,
        cancel: &CancelToken,
    ) -> Result<String>;

    /// Remove everything tracked under `scope`
    ///
    /// Succeeds when nothing is tracked.
    fn destroy(&self, scope: &InventoryScope, cancel: &CancelToken) -> Result<String>;
}

/// Executor backed by `kpt live apply` / `kpt live destroy`
#[derive(Debug, Clone)]
pub struct KptExecutor {
    kpt: PathBuf,
}

impl KptExecutor {
    /// Use the `kpt` binary at `kpt`
    pub fn new(kpt: impl Into<PathBuf>) -> Self {
        Self { kpt: kpt.into() }
    }
}

impl Default for KptExecutor {
    fn default() -> Self {
        Self::new("kpt")
    }
}

impl Executor for KptExecutor {
    fn apply(
        &self,
        scope: &InventoryScope,
        manifests: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut input = String::with_capacity(manifests.len() + 256);
        input.push_str(manifests);
        input.push_str("\n---\n");
        input.push_str(&resource_group_manifest(scope)?);

        let invocation = Invocation::new(&self.kpt)
            .args(["live", "apply", "-"])
            .stdin(input);
        Ok(run(&invocation, cancel)?.stdout)
    }

    fn destroy(&self, scope: &InventoryScope, cancel: &CancelToken) -> Result<String> {
        let invocation = Invocation::new(&self.kpt)
            .args(["live", "destroy", "-"])
            .stdin(resource_group_manifest(scope)?);
        Ok(run(&invocation, cancel)?.stdout)
    }
}

/// A recorded executor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    /// `apply` with the manifests it was given
    Apply {
        /// Inventory the call targeted
        scope: InventoryScope,
        /// Manifests passed to apply
        manifests: String,
    },
    /// `destroy` of an inventory
    Destroy {
        /// Inventory the call targeted
        scope: InventoryScope,
    },
}

/// In-memory executor for tests and dry runs
///
/// Records every call and tracks the last manifest applied per inventory
/// id. Failures can be injected per operation.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<ExecutorCall>,
    tracked: HashMap<String, String>,
    apply_failure: Option<String>,
    destroy_failure: Option<String>,
}

impl MockExecutor {
    /// An executor with nothing tracked and no failures
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent applies fail with `stderr`
    pub fn fail_apply(&self, stderr: impl Into<String>) {
        self.lock().apply_failure = Some(stderr.into());
    }

    /// Make subsequent destroys fail with `stderr`
    pub fn fail_destroy(&self, stderr: impl Into<String>) {
        self.lock().destroy_failure = Some(stderr.into());
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.apply_failure = None;
        state.destroy_failure = None;
    }

    /// All calls in order, including failed ones
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.lock().calls.clone()
    }

    /// Number of apply calls, failed ones included
    pub fn apply_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ExecutorCall::Apply { .. }))
            .count()
    }

    /// Number of destroy calls, failed ones included
    pub fn destroy_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ExecutorCall::Destroy { .. }))
            .count()
    }

    /// Manifest currently tracked under an inventory id
    pub fn applied(&self, inventory_id: &str) -> Option<String> {
        self.lock().tracked.get(inventory_id).cloned()
    }

    /// Number of inventories with live resources
    pub fn tracked_count(&self) -> usize {
        self.lock().tracked.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mock_failure(stderr: &str) -> Error {
    Error::CommandFailed {
        program: "mock".to_string(),
        code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

impl Executor for MockExecutor {
    fn apply(
        &self,
        scope: &InventoryScope,
        manifests: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(ExecutorCall::Apply {
            scope: scope.clone(),
            manifests: manifests.to_string(),
        });

        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                program: "mock".to_string(),
                timed_out: cancel.timed_out(),
            });
        }
        if let Some(stderr) = &state.apply_failure {
            return Err(mock_failure(stderr));
        }

        let previous = state
            .tracked
            .insert(scope.id.clone(), manifests.to_string());
        Ok(if previous.is_some() {
            format!("inventory {} reconciled", scope.id)
        } else {
            format!("inventory {} created", scope.id)
        })
    }

    fn destroy(&self, scope: &InventoryScope, cancel: &CancelToken) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(ExecutorCall::Destroy {
            scope: scope.clone(),
        });

        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                program: "mock".to_string(),
                timed_out: cancel.timed_out(),
            });
        }
        if let Some(stderr) = &state.destroy_failure {
            return Err(mock_failure(stderr));
        }

        Ok(match state.tracked.remove(&scope.id) {
            Some(_) => format!("inventory {} destroyed", scope.id),
            None => format!("inventory {} has nothing to destroy", scope.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ObjectKey;

    fn scope() -> InventoryScope {
        InventoryScope::new(ObjectKey::new("default", "demo"), "uid-1")
    }

    #[test]
    fn test_mock_apply_then_destroy() {
        let exec = MockExecutor::new();
        let cancel = CancelToken::new();

        exec.apply(&scope(), "kind: Deployment\n", &cancel).unwrap();
        assert_eq!(exec.applied("uid-1").as_deref(), Some("kind: Deployment\n"));

        exec.destroy(&scope(), &cancel).unwrap();
        assert!(exec.applied("uid-1").is_none());
        assert_eq!(exec.apply_count(), 1);
        assert_eq!(exec.destroy_count(), 1);
    }

    #[test]
    fn test_mock_destroy_is_idempotent() {
        let exec = MockExecutor::new();
        let cancel = CancelToken::new();

        assert!(exec.destroy(&scope(), &cancel).is_ok());
        assert!(exec.destroy(&scope(), &cancel).is_ok());
        assert_eq!(exec.tracked_count(), 0);
    }

    #[test]
    fn test_mock_injected_failure() {
        let exec = MockExecutor::new();
        exec.fail_apply("quota exceeded");

        let err = exec
            .apply(&scope(), "x", &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(exec.tracked_count(), 0);

        exec.clear_failures();
        assert!(exec.apply(&scope(), "x", &CancelToken::new()).is_ok());
    }

    #[test]
    fn test_kpt_missing_binary_is_spawn_error() {
        let exec = KptExecutor::new("kpt-missing-for-test-91be");
        let err = exec.destroy(&scope(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_kpt_failure_carries_stderr() {
        // `sh` stands in for kpt: the arguments become a script that fails
        let exec = KptExecutor::new("sh");
        let err = exec
            .apply(&scope(), "kind: Deployment\n", &CancelToken::new())
            .unwrap_err();
        match err {
            Error::CommandFailed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
