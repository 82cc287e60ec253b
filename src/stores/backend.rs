//! Durable key-value blob storage underneath the record store.
//!
//! The record store only ever asks for one key at a time and always reads or
//! writes the whole blob, so the interface is deliberately small.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Synchronous blob storage addressed by a logical key.
pub trait BlobStore {
    /// Returns the blob under `key`, or `None` if nothing was ever written.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the blob under `key`.
    fn write(&mut self, key: &str, blob: &[u8]) -> io::Result<()>;
}

/// In-process storage, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: HashMap::new(),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).cloned())
    }

    fn write(&mut self, key: &str, blob: &[u8]) -> io::Result<()> {
        self.blobs.insert(key.to_string(), blob.to_vec());
        Ok(())
    }
}

/// One `<key>.json` file per key inside a data directory.
///
/// Writes go to a sibling temp file that is fsynced and then renamed over the
/// target, so readers see either the old blob or the new one.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    /// Opens the store, creating `dir` if it does not exist.
    pub fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, key: &str, blob: &[u8]) -> io::Result<()> {
        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(blob)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)
    }
}
