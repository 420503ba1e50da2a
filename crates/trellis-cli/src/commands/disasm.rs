//! Disasm command - print a bundle symbol's bytecode.

use anyhow::{Context as _, Result};
use std::path::Path;
use trellis_runtime::bytecode;
use trellis_store::{FsStore, Prefix, Store};

pub fn run(dir: &Path, sym: &str) -> Result<u8> {
    let store = FsStore::open(dir)
        .with_context(|| format!("failed to open bundle at {}", dir.display()))?;
    let code = store
        .get(Prefix::Bin, sym.as_bytes(), None)
        .with_context(|| format!("no bytecode for symbol '{sym}'"))?;
    let listing = bytecode::disassemble(&code)
        .with_context(|| format!("failed to decode bytecode for '{sym}'"))?;
    print!("{listing}");
    Ok(0)
}
