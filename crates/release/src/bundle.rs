//! The release bundle type: a named tree of manifest templates.

use crate::error::{Error, Result};
use blake3::Hasher;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Where a bundle's files come from
#[derive(Debug, Clone)]
enum Source {
    /// Files compiled into the binary, keyed by `/`-separated relative path
    Embedded(BTreeMap<String, Vec<u8>>),
    /// A directory on disk
    Directory(PathBuf),
}

/// An immutable, named tree of manifest templates
///
/// The bundle root contains a `kustomization.yaml` listing its resources.
/// `target` names the Deployment that replica overrides are patched onto.
#[derive(Debug, Clone)]
pub struct ReleaseBundle {
    name: String,
    target: String,
    source: Source,
}

impl ReleaseBundle {
    /// Create a bundle from in-memory files
    ///
    /// Paths are relative and `/`-separated (e.g. `"base/deployment.yaml"`).
    pub fn embedded<'a>(
        name: impl Into<String>,
        target: impl Into<String>,
        files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> Self {
        let files = files
            .into_iter()
            .map(|(path, content)| (path.to_string(), content.to_vec()))
            .collect();

        Self {
            name: name.into(),
            target: target.into(),
            source: Source::Embedded(files),
        }
    }

    /// Create a bundle backed by a directory on disk
    ///
    /// The directory is read on every checksum or extraction; it must not be
    /// modified while the bundle is registered.
    pub fn from_dir(name: impl Into<String>, target: impl Into<String>, root: PathBuf) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            source: Source::Directory(root),
        }
    }

    /// Bundle name (registry key)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the Deployment resource that overrides are patched onto
    pub fn target_name(&self) -> &str {
        &self.target
    }

    /// Read every regular file in the bundle, keyed by relative path
    ///
    /// Keys use `/` as the separator regardless of platform, so embedded and
    /// on-disk copies of the same tree produce identical maps.
    pub fn files(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        match &self.source {
            Source::Embedded(files) => Ok(files.clone()),
            Source::Directory(root) => read_tree(root),
        }
    }

    /// Content digest of the bundle
    ///
    /// Hashes every regular file in lexicographic relative-path order. Each
    /// file contributes its relative path, its length and its contents, so
    /// renames and content changes both alter the digest. Returns a
    /// hex-encoded BLAKE3 digest.
    pub fn checksum(&self) -> Result<String> {
        let files = self.files()?;
        if files.is_empty() {
            return Err(Error::Empty(self.name.clone()));
        }

        let mut hasher = Hasher::new();
        for (path, content) in &files {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(content.len() as u64).to_le_bytes());
            hasher.update(content);
        }

        let digest = hasher.finalize().to_hex().to_string();
        log::debug!(
            "Checksummed release bundle {} ({} files): {digest}",
            self.name,
            files.len()
        );
        Ok(digest)
    }

    /// Write the bundle contents into `dir`, creating subdirectories
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let files = self.files()?;
        if files.is_empty() {
            return Err(Error::Empty(self.name.clone()));
        }

        for (relative, content) in &files {
            let dest = dir.join(checked_relative(relative)?);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::write(&dest, content).map_err(|e| Error::io(&dest, e))?;
        }

        log::debug!(
            "Extracted release bundle {} into {}",
            self.name,
            dir.display()
        );
        Ok(())
    }
}

/// Walk a directory and read all regular files
///
/// Walk errors are failures: a partially read tree must never produce a
/// checksum.
fn read_tree(root: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|source| Error::Walk {
            path: root.to_path_buf(),
            source,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|_| Error::InvalidPath(path.display().to_string()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = fs::read(path).map_err(|e| Error::io(path, e))?;
        files.insert(key, content);
    }

    Ok(files)
}

/// Reject absolute paths and `..` so extraction stays inside the target
fn checked_relative(relative: &str) -> Result<&Path> {
    let path = Path::new(relative);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        return Err(Error::InvalidPath(relative.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ReleaseBundle {
        ReleaseBundle::embedded(
            "sample",
            "web",
            [
                ("kustomization.yaml", b"resources:\n- deployment.yaml\n".as_slice()),
                ("deployment.yaml", b"kind: Deployment\n".as_slice()),
                ("base/extra.yaml", b"kind: ConfigMap\n".as_slice()),
            ],
        )
    }

    #[test]
    fn test_checksum_is_stable() {
        let bundle = sample();
        let first = bundle.checksum().unwrap();
        let second = bundle.checksum().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let changed = ReleaseBundle::embedded(
            "sample",
            "web",
            [
                ("kustomization.yaml", b"resources:\n- deployment.yaml\n".as_slice()),
                ("deployment.yaml", b"kind: Deployment!\n".as_slice()),
                ("base/extra.yaml", b"kind: ConfigMap\n".as_slice()),
            ],
        );
        assert_ne!(sample().checksum().unwrap(), changed.checksum().unwrap());
    }

    #[test]
    fn test_checksum_changes_with_path() {
        let a = ReleaseBundle::embedded("a", "web", [("one.yaml", b"x".as_slice())]);
        let b = ReleaseBundle::embedded("b", "web", [("two.yaml", b"x".as_slice())]);
        assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
    }

    #[test]
    fn test_checksum_ignores_bundle_name() {
        let a = ReleaseBundle::embedded("a", "web", [("one.yaml", b"x".as_slice())]);
        let b = ReleaseBundle::embedded("b", "api", [("one.yaml", b"x".as_slice())]);
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
    }

    #[test]
    fn test_checksum_empty_bundle_fails() {
        let empty = ReleaseBundle::embedded("empty", "web", std::iter::empty());
        assert!(matches!(empty.checksum(), Err(Error::Empty(name)) if name == "empty"));
    }

    #[test]
    fn test_checksum_missing_dir_fails() {
        let temp = TempDir::new().unwrap();
        let bundle = ReleaseBundle::from_dir("gone", "web", temp.path().join("missing"));
        assert!(matches!(bundle.checksum(), Err(Error::Walk { .. })));
    }

    #[test]
    fn test_embedded_and_disk_checksums_match() {
        let temp = TempDir::new().unwrap();
        let bundle = sample();
        bundle.write_to(temp.path()).unwrap();

        let on_disk = ReleaseBundle::from_dir("sample", "web", temp.path().to_path_buf());
        assert_eq!(bundle.checksum().unwrap(), on_disk.checksum().unwrap());
    }

    #[test]
    fn test_disk_checksum_detects_single_byte_change() {
        let temp = TempDir::new().unwrap();
        sample().write_to(temp.path()).unwrap();
        let bundle = ReleaseBundle::from_dir("sample", "web", temp.path().to_path_buf());
        let before = bundle.checksum().unwrap();

        fs::write(temp.path().join("base/extra.yaml"), b"kind: ConfigMaq\n").unwrap();
        assert_ne!(before, bundle.checksum().unwrap());
    }

    #[test]
    fn test_write_to_creates_subdirectories() {
        let temp = TempDir::new().unwrap();
        sample().write_to(temp.path()).unwrap();

        assert!(temp.path().join("kustomization.yaml").is_file());
        assert!(temp.path().join("base").join("extra.yaml").is_file());
        assert_eq!(
            fs::read_to_string(temp.path().join("deployment.yaml")).unwrap(),
            "kind: Deployment\n"
        );
    }

    #[test]
    fn test_write_to_rejects_escaping_paths() {
        let temp = TempDir::new().unwrap();
        let bad = ReleaseBundle::embedded("bad", "web", [("../evil.yaml", b"x".as_slice())]);
        assert!(matches!(bad.write_to(temp.path()), Err(Error::InvalidPath(_))));
    }
}
