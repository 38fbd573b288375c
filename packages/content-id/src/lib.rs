//! # Content Identifiers
//!
//! A package is identified by a hash over its normalized file set, so two
//! copies of a package compare equal no matter how they were transported.
//!
//! The computation is behind the [`ContentAddresser`] trait; the default
//! [`Sha256Tree`] hashes each file, then hashes the sorted
//! `path NUL digest` listing, and renders the root as a SHA-256 multihash in
//! hex (`1220` followed by 64 hex digits).
//!
//! Files that are not part of a package's identity are skipped:
//! `chain.json` (instance metadata shipped alongside), `timestamp.txt`,
//! dotfiles and `__MACOSX` archive debris.

use std::collections::BTreeMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Multihash prefix for a 32-byte SHA-256 digest.
pub const MULTIHASH_SHA256_PREFIX: &str = "1220";

/// A file in a package: a relative path and its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl PackageFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Errors while collecting package files.
#[derive(Debug, Error)]
pub enum ContentIdError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("package has no identifying files")]
    Empty,
}

/// Computes a stable identifier for a set of files.
pub trait ContentAddresser: Send + Sync {
    /// Compute the identifier of `files`.
    fn content_id(&self, files: &[PackageFile]) -> Result<String, ContentIdError>;

    /// Whether `files` hash to `expected`.
    fn verify(&self, files: &[PackageFile], expected: &str) -> bool {
        self.content_id(files)
            .map(|id| id.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    }
}

/// SHA-256 over the sorted `(path, digest)` listing of a package.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Tree;

impl ContentAddresser for Sha256Tree {
    fn content_id(&self, files: &[PackageFile]) -> Result<String, ContentIdError> {
        let mut listing: BTreeMap<String, [u8; 32]> = BTreeMap::new();
        for file in files {
            let Some(path) = normalize_path(&file.path) else {
                continue;
            };
            listing.insert(path, Sha256::digest(&file.content).into());
        }

        if listing.is_empty() {
            return Err(ContentIdError::Empty);
        }

        let mut root = Sha256::new();
        for (path, digest) in &listing {
            root.update(path.as_bytes());
            root.update([0u8]);
            root.update(digest);
        }
        Ok(format!(
            "{}{}",
            MULTIHASH_SHA256_PREFIX,
            hex::encode(root.finalize())
        ))
    }
}

/// Normalize a package path, or `None` if the file is excluded from identity.
///
/// Strips `./` and a leading `package/` directory, and uses `/` separators.
pub fn normalize_path(path: &str) -> Option<String> {
    let path = path.replace('\\', "/");
    let mut components: Vec<&str> = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();

    if components.first() == Some(&"package") && components.len() > 1 {
        components.remove(0);
    }

    let name = *components.last()?;
    let excluded = name == "chain.json"
        || name == "timestamp.txt"
        || components
            .iter()
            .any(|c| c.starts_with('.') || c.contains("__MACOSX"));
    if excluded {
        return None;
    }
    Some(components.join("/"))
}

/// Read every file under `dir` as package files, with paths relative to `dir`.
pub fn read_dir(dir: &Path) -> Result<Vec<PackageFile>, ContentIdError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        files.push(PackageFile::new(relative, std::fs::read(entry.path())?));
    }
    Ok(files)
}

/// Convenience: compute the default identifier of `files`.
pub fn compute_content_id(files: &[PackageFile]) -> Result<String, ContentIdError> {
    Sha256Tree.content_id(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package() -> Vec<PackageFile> {
        vec![
            PackageFile::new("ownable_bg.wasm", b"\0asm".to_vec()),
            PackageFile::new("ownable.js", b"export {}".to_vec()),
            PackageFile::new("index.html", b"<html/>".to_vec()),
        ]
    }

    #[test]
    fn id_has_multihash_prefix() {
        let id = compute_content_id(&package()).unwrap();
        assert!(id.starts_with(MULTIHASH_SHA256_PREFIX));
        assert_eq!(id.len(), 4 + 64);
    }

    #[test]
    fn order_and_prefixes_do_not_matter() {
        let a = compute_content_id(&package()).unwrap();

        let mut reordered = package();
        reordered.reverse();
        for f in &mut reordered {
            f.path = format!("./package/{}", f.path);
        }
        assert_eq!(compute_content_id(&reordered).unwrap(), a);
    }

    #[test]
    fn metadata_files_are_ignored() {
        let a = compute_content_id(&package()).unwrap();

        let mut with_meta = package();
        with_meta.push(PackageFile::new("chain.json", b"{}".to_vec()));
        with_meta.push(PackageFile::new("timestamp.txt", b"123".to_vec()));
        with_meta.push(PackageFile::new(".DS_Store", b"junk".to_vec()));
        with_meta.push(PackageFile::new("__MACOSX/ownable.js", b"junk".to_vec()));
        assert_eq!(compute_content_id(&with_meta).unwrap(), a);
    }

    #[test]
    fn content_change_changes_id() {
        let a = compute_content_id(&package()).unwrap();
        let mut changed = package();
        changed[1].content.push(b'\n');
        assert_ne!(compute_content_id(&changed).unwrap(), a);
    }

    #[test]
    fn rename_changes_id() {
        let a = compute_content_id(&package()).unwrap();
        let mut renamed = package();
        renamed[2].path = "widget.html".to_string();
        assert_ne!(compute_content_id(&renamed).unwrap(), a);
    }

    #[test]
    fn empty_package_is_an_error() {
        let only_meta = vec![PackageFile::new("chain.json", b"{}".to_vec())];
        assert!(matches!(
            compute_content_id(&only_meta),
            Err(ContentIdError::Empty)
        ));
    }

    #[test]
    fn verify_is_case_insensitive() {
        let id = compute_content_id(&package()).unwrap();
        assert!(Sha256Tree.verify(&package(), &id.to_uppercase()));
        assert!(!Sha256Tree.verify(&package(), "1220deadbeef"));
    }

    #[test]
    fn read_dir_matches_in_memory_files() {
        let dir = tempfile::tempdir().unwrap();
        for f in package() {
            std::fs::write(dir.path().join(&f.path), &f.content).unwrap();
        }
        let files = read_dir(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(
            compute_content_id(&files).unwrap(),
            compute_content_id(&package()).unwrap()
        );
    }
}
