//! On-disk store.
//!
//! Layout, one directory per instance:
//!
//! ```text
//! <root>/<id>/chain.json   chain record
//! <root>/<id>/state.json   state dump
//! <root>/<id>/applied      hex hash of the last applied event
//! ```
//!
//! Files are written to a sibling temporary file and renamed into place, so a
//! reader sees either the old or the new contents.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ownables_event_chain::Hash;
use tracing::debug;

use crate::dump::StateDump;
use crate::error::{Result, StoreError};
use crate::record::ChainRecord;
use crate::traits::{validate_id, ChainStore, StateDumpStore};

const CHAIN_FILE: &str = "chain.json";
const STATE_FILE: &str = "state.json";
const APPLIED_FILE: &str = "applied";

/// A store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let attr = fs::metadata(&root)?;
        if !attr.is_dir() {
            return Err(io::Error::other(format!(
                "store root {} is not a directory",
                root.display()
            ))
            .into());
        }
        if attr.permissions().readonly() {
            return Err(io::Error::other(format!(
                "store root {} is not writable",
                root.display()
            ))
            .into());
        }

        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn instance_dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    fn file(&self, id: &str, name: &str) -> Result<PathBuf> {
        Ok(self.instance_dir(id)?.join(name))
    }

    fn read_file(path: &Path) -> Result<Option<String>> {
        debug!(path = %path.display(), "reading");
        match fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
        debug!(path = %path.display(), bytes = contents.len(), "writing");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut f = fs::File::create(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn remove_file(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateDumpStore for DiskStore {
    fn get(&self, id: &str) -> Result<Option<StateDump>> {
        let Some(json) = Self::read_file(&self.file(id, STATE_FILE)?)? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                message: e.to_string(),
            })
    }

    fn put(&self, id: &str, dump: &StateDump) -> Result<()> {
        let json = serde_json::to_vec(dump)?;
        Self::write_file(&self.file(id, STATE_FILE)?, &json)
    }

    fn remove(&self, id: &str) -> Result<()> {
        Self::remove_file(&self.file(id, STATE_FILE)?)
    }
}

impl ChainStore for DiskStore {
    fn load_chain(&self, id: &str) -> Result<Option<ChainRecord>> {
        match Self::read_file(&self.file(id, CHAIN_FILE)?)? {
            Some(json) => ChainRecord::from_json(&json).map(Some),
            None => Ok(None),
        }
    }

    fn save_chain(&self, id: &str, record: &ChainRecord) -> Result<()> {
        let json = record.to_json()?;
        Self::write_file(&self.file(id, CHAIN_FILE)?, json.as_bytes())
    }

    fn applied(&self, id: &str) -> Result<Option<Hash>> {
        let Some(hex) = Self::read_file(&self.file(id, APPLIED_FILE)?)? else {
            return Ok(None);
        };
        Hash::from_hex(hex.trim())
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                message: e.to_string(),
            })
    }

    fn set_applied(&self, id: &str, hash: &Hash) -> Result<()> {
        Self::write_file(&self.file(id, APPLIED_FILE)?, hash.to_hex().as_bytes())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(CHAIN_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_id(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, id: &str) -> Result<()> {
        Self::remove_file(&self.file(id, CHAIN_FILE)?)?;
        Self::remove_file(&self.file(id, APPLIED_FILE)?)?;

        let dir = self.instance_dir(id)?;
        // Only drop the directory once the state dump is gone too.
        if fs::read_dir(&dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
            fs::remove_dir(&dir)?;
        }
        Ok(())
    }
}
