//! Built-in bundle behavior as seen by consumers of the crate.

use release::{RAPID, Registry};
use std::fs;
use tempfile::TempDir;

#[test]
fn rapid_checksum_is_repeatable() {
    let registry = Registry::builtin();
    let rapid = registry.get(RAPID).unwrap();

    let first = rapid.checksum().unwrap();
    let second = rapid.checksum().unwrap();

    assert!(!first.is_empty());
    assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(first, second);
}

#[test]
fn rapid_extracts_kustomization() {
    let temp = TempDir::new().unwrap();
    Registry::builtin()
        .get(RAPID)
        .unwrap()
        .write_to(temp.path())
        .unwrap();

    let kustomization = fs::read_to_string(temp.path().join("kustomization.yaml")).unwrap();
    assert!(kustomization.contains("deployment.yaml"));

    let files = fs::read_dir(temp.path()).unwrap().count();
    assert!(files > 0);
}

#[test]
fn extracted_copy_checksums_like_original() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::builtin();
    let rapid = registry.get(RAPID).unwrap();
    rapid.write_to(temp.path()).unwrap();

    let copy = release::ReleaseBundle::from_dir("copy", "web", temp.path().to_path_buf());
    assert_eq!(rapid.checksum().unwrap(), copy.checksum().unwrap());
}
