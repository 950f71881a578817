use deployer::{CancelToken, MockExecutor, ObjectKey, OverlayRenderer};
use reconciler::{
    BundleDeploymentSpec, Controller, MemoryStore, ObjectStore, Outcome, Reconciler,
    RequeuePolicy,
};
use release::Registry;
use std::sync::Arc;
use std::time::Duration;

fn setup(policy: RequeuePolicy) -> (Arc<MemoryStore>, MockExecutor, Controller) {
    let store = Arc::new(MemoryStore::new());
    let executor = MockExecutor::new();
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(Registry::builtin()),
        Arc::new(OverlayRenderer),
        Arc::new(executor.clone()),
    );
    let controller = Controller::new(reconciler, 4)
        .unwrap()
        .with_policy(policy)
        .with_timeout(Duration::from_secs(30));
    (store, executor, controller)
}

fn fast_retry(max_attempts: u32) -> RequeuePolicy {
    RequeuePolicy::new(max_attempts, Duration::from_millis(1), 1.0)
}

fn spec(bundle: &str, replicas: u32) -> BundleDeploymentSpec {
    BundleDeploymentSpec {
        replicas,
        release_bundle: bundle.into(),
    }
}

fn keys(n: usize) -> Vec<ObjectKey> {
    (0..n)
        .map(|i| ObjectKey::new("team", format!("app-{i}")))
        .collect()
}

#[test]
fn test_watch_events_drive_objects_to_ready() {
    let (store, executor, mut controller) = setup(fast_retry(3));
    for key in keys(5) {
        store.create(&key, spec("stable", 2)).unwrap();
    }

    let summary = controller.run_until_idle(&CancelToken::new());

    assert!(summary.is_success(), "failures: {:?}", summary.failed);
    assert_eq!(executor.apply_count(), 5);
    for key in keys(5) {
        let obj = store.get(&key).unwrap().unwrap();
        assert!(obj.status.ready);
        assert_eq!(summary.outcomes.get(&key), Some(&Outcome::UpToDate));
    }
    assert_eq!(controller.pending(), 0);
}

#[test]
fn test_idle_rerun_is_noop() {
    let (store, executor, mut controller) = setup(fast_retry(3));
    store.create(&keys(1)[0], spec("rapid", 1)).unwrap();
    controller.run_until_idle(&CancelToken::new());

    controller.enqueue_all(keys(1));
    let summary = controller.run_until_idle(&CancelToken::new());

    assert_eq!(summary.reconciled, 1);
    assert_eq!(executor.apply_count(), 1);
}

#[test]
fn test_spec_edit_is_picked_up() {
    let (store, executor, mut controller) = setup(fast_retry(3));
    let key = keys(1).remove(0);
    store.create(&key, spec("rapid", 1)).unwrap();
    controller.run_until_idle(&CancelToken::new());

    store.update_spec(&key, spec("rapid", 8)).unwrap();
    let summary = controller.run_until_idle(&CancelToken::new());

    assert!(summary.is_success());
    assert_eq!(executor.apply_count(), 2);
    let obj = store.get(&key).unwrap().unwrap();
    assert_eq!(obj.status.observed_generation, obj.metadata.generation);
}

#[test]
fn test_delete_cleans_up_everything() {
    let (store, executor, mut controller) = setup(fast_retry(3));
    for key in keys(3) {
        store.create(&key, spec("rapid", 1)).unwrap();
    }
    controller.run_until_idle(&CancelToken::new());
    assert_eq!(executor.tracked_count(), 3);

    for key in keys(3) {
        store.delete(&key).unwrap();
    }
    let summary = controller.run_until_idle(&CancelToken::new());

    assert!(summary.is_success());
    assert_eq!(executor.destroy_count(), 3);
    assert_eq!(executor.tracked_count(), 0);
    assert!(store.list().is_empty());
    assert!(store.snapshot().resource_groups.is_empty());
}

#[test]
fn test_transient_failure_exhausts_attempts() {
    let (store, executor, mut controller) = setup(fast_retry(3));
    let key = keys(1).remove(0);
    store.create(&key, spec("rapid", 1)).unwrap();
    executor.fail_apply("cluster unreachable");

    let summary = controller.run_until_idle(&CancelToken::new());

    assert!(!summary.is_success());
    assert!(summary.failed[&key].contains("cluster unreachable"));
    assert_eq!(executor.apply_count(), 3);
    assert!(!store.get(&key).unwrap().unwrap().status.ready);
}

#[test]
fn test_configuration_error_is_not_retried() {
    let (store, _executor, mut controller) = setup(fast_retry(5));
    let good = ObjectKey::new("team", "good");
    let bad = ObjectKey::new("team", "bad");
    store.create(&good, spec("rapid", 1)).unwrap();
    store.create(&bad, spec("nightly", 1)).unwrap();

    let summary = controller.run_until_idle(&CancelToken::new());

    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[&bad].contains("nightly"));
    assert!(store.get(&good).unwrap().unwrap().status.ready);
    assert_eq!(controller.pending(), 0);
}

#[test]
fn test_recovery_after_failure() {
    let (store, executor, mut controller) = setup(fast_retry(1));
    let key = keys(1).remove(0);
    store.create(&key, spec("rapid", 1)).unwrap();
    executor.fail_apply("quota exceeded");

    let summary = controller.run_until_idle(&CancelToken::new());
    assert!(summary.failed.contains_key(&key));

    executor.clear_failures();
    controller.enqueue(key.clone());
    let summary = controller.run_until_idle(&CancelToken::new());
    assert!(summary.is_success());
    assert!(store.get(&key).unwrap().unwrap().status.ready);
}

#[test]
fn test_cancelled_run_stops() {
    let (store, executor, mut controller) = setup(fast_retry(3));
    store.create(&keys(1)[0], spec("rapid", 1)).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = controller.run_until_idle(&cancel);

    assert!(summary.cancelled);
    assert_eq!(summary.reconciled, 0);
    assert_eq!(executor.apply_count(), 0);
    assert_eq!(controller.pending(), 1);
}

#[test]
fn test_retry_waits_for_backoff_despite_own_writes() {
    let (store, executor, mut controller) =
        setup(RequeuePolicy::new(5, Duration::from_secs(10), 2.0));
    let key = keys(1).remove(0);
    store.create(&key, spec("rapid", 1)).unwrap();
    executor.fail_apply("boom");

    // The failing pass creates the ResourceGroup before apply, which emits
    // a watch event for the same key
    let summary = controller.run_until_idle(&CancelToken::with_timeout(Duration::from_secs(1)));

    assert!(summary.cancelled);
    assert_eq!(executor.apply_count(), 1);
    assert!(store.get_resource_group(&key).unwrap().is_some());
    assert_eq!(controller.pending(), 1);
}
