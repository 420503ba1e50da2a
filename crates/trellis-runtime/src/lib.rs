//! trellis runtime - menu-tree bytecode VM for narrow-channel terminals
//!
//! A deterministic virtual machine drives a tree of named nodes: short
//! textual inputs move a session through the tree, pluggable resolvers
//! supply bytecode, templates and dynamic values, and rendered pages go
//! back over the wire. Sessions persist between stateless invocations.
//!
//! The crate provides:
//! - Instruction set and wire codec ([`bytecode`])
//! - Frame-scoped symbol cache with byte budgets ([`cache`])
//! - Session state register ([`state`])
//! - Resolver contract and implementations ([`resource`])
//! - Page renderer ([`render`])
//! - The VM and the per-turn engine ([`vm`], [`engine`])

/// Runtime crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bytecode;
pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod render;
pub mod resource;
pub mod state;
pub mod vm;

pub use bytecode::{Instr, Opcode};
pub use cache::Cache;
pub use context::{CancelToken, Context};
pub use engine::{Config, Engine};
pub use error::{ErrorKind, RuntimeError};
pub use render::{MenuEntry, Page};
pub use resource::{EntryFn, FnResource, Resource, StoreResource};
pub use state::State;
pub use vm::{Vm, CATCH_SYM, INPUT_WILDCARD, TARGET_BACK};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
