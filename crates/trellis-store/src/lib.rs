//! Persistence backends for trellis.
//!
//! A [`Store`] is a key-value store with typed keys: every key is a
//! [`Prefix`] naming the kind of record plus opaque key bytes. The engine
//! persists session blobs under [`Prefix::State`]; content bundles serve
//! bytecode, templates and menu labels under their own prefixes.
//!
//! Two backends are provided:
//! - [`FsStore`]: one file per record beneath a base directory
//! - [`MemStore`]: in-memory map, used by tests and embedders

pub mod fs;
pub mod mem;

pub use fs::FsStore;
pub use mem::MemStore;

use thiserror::Error;

/// Bundle bytecode container version.
///
/// [`Prefix::Bin`] records are stored as `version:u8 | bytecode`;
/// readers reject any other version. An empty record is an empty
/// program.
pub const BIN_VERSION: u8 = 0;

/// Errors returned by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key was queried successfully but matched no stored record.
    /// Carries the hex-encoded key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A `Bin` record carries a container version this build does not
    /// read.
    #[error("unsupported bundle version: found {found}, want {want}")]
    UnsupportedVersion { found: u8, want: u8 },

    /// Write attempted on a store that was not opened writable.
    #[error("store is read-only")]
    ReadOnly,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Build a `NotFound` for the given raw key bytes.
    pub fn not_found(prefix: Prefix, key: &[u8]) -> Self {
        let mut full = vec![prefix as u8];
        full.extend_from_slice(key);
        StoreError::NotFound(hex::encode(full))
    }
}

/// Record kind, encoded as the leading byte of every stored key.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    /// Session state blob, keyed by session id.
    State = 0x01,
    /// Reserved for externally cached symbol values.
    Cache = 0x02,
    /// Node bytecode.
    Code = 0x03,
    /// Page templates.
    Template = 0x04,
    /// Menu labels.
    Menu = 0x05,
    /// Compiled bundle binaries.
    Bin = 0x06,
    /// Values loaded once at bundle install time.
    StaticLoad = 0x07,
}

/// Key-value persistence contract.
///
/// Within one prefix namespace keys are opaque bytes. `get` may consult a
/// language tag to prefer translated records; backends without translations
/// ignore it. Implementations are responsible for per-session
/// read-modify-write exclusion; the engine calls `get`/`put` strictly
/// sequentially within a turn.
pub trait Store: Send {
    /// Fetch a record. A translated record for `lang` is preferred over the
    /// default one when both exist.
    fn get(&self, prefix: Prefix, key: &[u8], lang: Option<&str>) -> Result<Vec<u8>, StoreError>;

    /// Write a record under the default name (and the translated name when
    /// `lang` is given).
    fn put(
        &mut self,
        prefix: Prefix,
        key: &[u8],
        value: &[u8],
        lang: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Release backend resources. Further calls are undefined.
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Wrap bytecode in its container for storage under [`Prefix::Bin`].
pub(crate) fn seal_bin(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 1);
    out.push(BIN_VERSION);
    out.extend_from_slice(value);
    out
}

/// Unwrap a stored `Bin` container, validating its version byte.
pub(crate) fn open_bin(raw: Vec<u8>) -> Result<Vec<u8>, StoreError> {
    match raw.first() {
        None => Ok(raw),
        Some(&v) if v == BIN_VERSION => Ok(raw[1..].to_vec()),
        Some(&v) => Err(StoreError::UnsupportedVersion {
            found: v,
            want: BIN_VERSION,
        }),
    }
}
