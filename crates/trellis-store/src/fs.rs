//! Filesystem-backed store.
//!
//! Maps `(prefix, key)` to a file beneath a base directory. The canonical
//! file name is the printable prefix digit followed by the key bytes
//! (`3root` for the `root` node's code). For compatibility with hand-built
//! bundles a legacy flat name is also tried on read: the bare key, with a
//! `.bin` suffix for [`Prefix::Bin`] records. Translated records live next
//! to the default ones with a `_<lang>` suffix and win on read.

use crate::{Prefix, Store, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Store backend with one file per record.
#[derive(Debug)]
pub struct FsStore {
    dir: PathBuf,
    writable: bool,
}

impl FsStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    /// The store starts read-only; see [`FsStore::writable`].
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            writable: false,
        })
    }

    /// Allow writes through this handle.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Canonical file name: printable prefix digit + key bytes.
    fn path_for(&self, prefix: Prefix, key: &[u8], lang: Option<&str>) -> PathBuf {
        let mut name = String::new();
        name.push((b'0' + prefix as u8) as char);
        name.push_str(&String::from_utf8_lossy(key));
        if let Some(lang) = lang {
            name.push('_');
            name.push_str(lang);
        }
        self.dir.join(name)
    }

    /// Legacy flat file name: bare key, `.bin`-suffixed for bundle binaries.
    fn alt_path_for(&self, prefix: Prefix, key: &[u8], lang: Option<&str>) -> PathBuf {
        let mut name = String::from_utf8_lossy(key).into_owned();
        if let Some(lang) = lang {
            name.push('_');
            name.push_str(lang);
        }
        if prefix == Prefix::Bin {
            name.push_str(".bin");
        }
        self.dir.join(name)
    }
}

impl Store for FsStore {
    fn get(&self, prefix: Prefix, key: &[u8], lang: Option<&str>) -> Result<Vec<u8>, StoreError> {
        let mut candidates = Vec::with_capacity(4);
        if lang.is_some() {
            candidates.push(self.path_for(prefix, key, lang));
            candidates.push(self.alt_path_for(prefix, key, lang));
        }
        candidates.push(self.path_for(prefix, key, None));
        candidates.push(self.alt_path_for(prefix, key, None));

        for path in candidates {
            trace!(?path, "fs get probe");
            match fs::read(&path) {
                Ok(v) if prefix == Prefix::Bin => return crate::open_bin(v),
                Ok(v) => return Ok(v),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::not_found(prefix, key))
    }

    fn put(
        &mut self,
        prefix: Prefix,
        key: &[u8],
        value: &[u8],
        lang: Option<&str>,
    ) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }
        let record = if prefix == Prefix::Bin {
            crate::seal_bin(value)
        } else {
            value.to_vec()
        };
        if lang.is_some() {
            fs::write(self.path_for(prefix, key, lang), &record)?;
        }
        fs::write(self.path_for(prefix, key, None), &record)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
