//! Package resolution.
//!
//! Packages are immutable file sets identified by their content id. The
//! coordinator reads bootstrap files through a [`PackageResolver`] only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ownables_content_id::{normalize_path, ContentAddresser, ContentIdError, PackageFile, Sha256Tree};
use thiserror::Error;
use tracing::{debug, info};

/// Compiled module.
pub const BYTECODE_FILE: &str = "ownable_bg.wasm";
/// Glue code loaded next to the module.
pub const GLUE_FILE: &str = "ownable.js";
/// Widget template, optional.
pub const WIDGET_FILE: &str = "index.html";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package {package} has no file {file}")]
    NotFound { package: String, file: String },

    #[error("invalid package id {0:?}")]
    InvalidId(String),

    #[error("invalid package path {0:?}")]
    InvalidPath(String),

    #[error("package {0} has no ownable_bg.wasm")]
    MissingBytecode(String),

    #[error("invalid bytecode: {0}")]
    Bytecode(String),

    #[error("{file} is not valid UTF-8")]
    NotText { file: String },

    #[error("content id error: {0}")]
    ContentId(#[from] ContentIdError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;

/// Resolves package files by content id.
pub trait PackageResolver: Send + Sync {
    fn resolve_asset(&self, package_id: &str, filename: &str) -> Result<Vec<u8>>;

    fn resolve_text(&self, package_id: &str, filename: &str) -> Result<String> {
        String::from_utf8(self.resolve_asset(package_id, filename)?).map_err(|_| {
            PackageError::NotText {
                file: filename.to_string(),
            }
        })
    }

    /// Store `files` and return their content id.
    fn import(&self, files: &[PackageFile]) -> Result<String>;
}

/// Files needed to start a sandbox for a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub bytecode: Vec<u8>,
    pub glue: Option<String>,
    pub widget: Option<String>,
}

/// Read the bootstrap files of `package_id`.
pub fn bootstrap(resolver: &dyn PackageResolver, package_id: &str) -> Result<Bootstrap> {
    let bytecode = match resolver.resolve_asset(package_id, BYTECODE_FILE) {
        Ok(bytecode) => bytecode,
        Err(PackageError::NotFound { .. }) => {
            return Err(PackageError::MissingBytecode(package_id.to_string()))
        }
        Err(e) => return Err(e),
    };
    Ok(Bootstrap {
        bytecode,
        glue: optional(resolver.resolve_text(package_id, GLUE_FILE))?,
        widget: optional(resolver.resolve_text(package_id, WIDGET_FILE))?,
    })
}

fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(PackageError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn check_id(package_id: &str) -> Result<()> {
    if !package_id.is_empty() && package_id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(PackageError::InvalidId(package_id.to_string()))
    }
}

fn check_path(filename: &str) -> Result<String> {
    normalize_path(filename).ok_or_else(|| PackageError::InvalidPath(filename.to_string()))
}

/// Packages stored as directories: `<root>/<content id>/<path>`.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of an imported package.
    pub fn package_dir(&self, package_id: &str) -> Result<PathBuf> {
        check_id(package_id)?;
        Ok(self.root.join(package_id.to_ascii_lowercase()))
    }
}

impl PackageResolver for DirectoryResolver {
    fn resolve_asset(&self, package_id: &str, filename: &str) -> Result<Vec<u8>> {
        let path = self.package_dir(package_id)?.join(check_path(filename)?);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PackageError::NotFound {
                package: package_id.to_string(),
                file: filename.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn import(&self, files: &[PackageFile]) -> Result<String> {
        let id = Sha256Tree.content_id(files)?;
        let dir = self.package_dir(&id)?;
        if dir.is_dir() {
            debug!(package = %id, "package already imported");
            return Ok(id);
        }

        // Write into a sibling and rename, so a package dir is always complete.
        let staging = self.root.join(format!(".{}.partial", id));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        for file in files {
            let Some(path) = normalize_path(&file.path) else {
                continue;
            };
            let target = staging.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.content)?;
        }
        std::fs::rename(&staging, &dir)?;

        info!(package = %id, files = files.len(), "package imported");
        Ok(id)
    }
}

/// Packages kept in memory.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    packages: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackageResolver for MemoryResolver {
    fn resolve_asset(&self, package_id: &str, filename: &str) -> Result<Vec<u8>> {
        check_id(package_id)?;
        let filename_key = check_path(filename)?;
        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        packages
            .get(&package_id.to_ascii_lowercase())
            .and_then(|files| files.get(&filename_key))
            .cloned()
            .ok_or_else(|| PackageError::NotFound {
                package: package_id.to_string(),
                file: filename.to_string(),
            })
    }

    fn import(&self, files: &[PackageFile]) -> Result<String> {
        let id = Sha256Tree.content_id(files)?;
        let contents = files
            .iter()
            .filter_map(|f| Some((normalize_path(&f.path)?, f.content.clone())))
            .collect();
        self.packages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), contents);
        Ok(id)
    }
}
