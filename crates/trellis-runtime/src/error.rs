//! Runtime error type.
//!
//! Every error carries a machine-readable [`ErrorKind`] and a
//! human-readable detail. Callers that need to branch on failure class
//! compare kinds; the display strings are for drivers and logs only.

use thiserror::Error;
use trellis_store::StoreError;

/// Machine-readable failure classification.
///
/// Equality on kind is the error contract: variants of [`RuntimeError`]
/// may carry richer detail, but each maps onto exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadInstruction,
    TruncatedCode,
    DuplicateSymbol,
    UnknownSymbol,
    OverBudget,
    StackUnderflow,
    LoadFail,
    ResolveFail,
    MissingSymbol,
    Terminated,
    Canceled,
}

/// Errors raised by the codec, cache, state register, renderer, VM and
/// engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// Content lookup matched nothing. Carries the hex-encoded store key
    /// or the symbol name, depending on the resolver.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unknown opcode in the bytecode stream.
    #[error("invalid instruction: {0:#06x}")]
    BadInstruction(u16),

    /// Instruction payload references a flag outside the configured width.
    #[error("flag index {0} out of range")]
    FlagOutOfRange(u8),

    /// Bundle bytecode container carries a version this runtime does
    /// not read.
    #[error("unsupported bundle version: {0}")]
    UnsupportedVersion(u8),

    /// Bytecode ended mid-instruction.
    #[error("truncated code at offset {0}")]
    TruncatedCode(usize),

    /// LOAD of a symbol that is already cached.
    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    /// Reference to a symbol absent from the cache.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A declared or configured size budget would be exceeded.
    #[error("size {size} exceeds budget {budget}")]
    OverBudget { size: usize, budget: usize },

    /// Navigation pop at the bottom frame.
    #[error("navigation stack underflow")]
    StackUnderflow,

    /// Resolver failure while executing LOAD or RELOAD.
    #[error("load of '{sym}' failed: {detail}")]
    LoadFail { sym: String, detail: String },

    /// Resolver failure outside LOAD, or a store backend failure.
    #[error("resolve of '{sym}' failed: {detail}")]
    ResolveFail { sym: String, detail: String },

    /// Template references a symbol with no cached value.
    #[error("no value mapped for template symbol '{0}'")]
    MissingSymbol(String),

    /// Session ended by CROAK; state has been wiped.
    #[error("session terminated")]
    Terminated,

    /// Cooperative cancellation between instructions; the remaining code
    /// is preserved in the state register.
    #[error("execution canceled")]
    Canceled,
}

impl RuntimeError {
    /// The failure class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::NotFound(_) => ErrorKind::NotFound,
            RuntimeError::BadInstruction(_) => ErrorKind::BadInstruction,
            RuntimeError::FlagOutOfRange(_) => ErrorKind::BadInstruction,
            RuntimeError::UnsupportedVersion(_) => ErrorKind::BadInstruction,
            RuntimeError::TruncatedCode(_) => ErrorKind::TruncatedCode,
            RuntimeError::DuplicateSymbol(_) => ErrorKind::DuplicateSymbol,
            RuntimeError::UnknownSymbol(_) => ErrorKind::UnknownSymbol,
            RuntimeError::OverBudget { .. } => ErrorKind::OverBudget,
            RuntimeError::StackUnderflow => ErrorKind::StackUnderflow,
            RuntimeError::LoadFail { .. } => ErrorKind::LoadFail,
            RuntimeError::ResolveFail { .. } => ErrorKind::ResolveFail,
            RuntimeError::MissingSymbol(_) => ErrorKind::MissingSymbol,
            RuntimeError::Terminated => ErrorKind::Terminated,
            RuntimeError::Canceled => ErrorKind::Canceled,
        }
    }

    /// True for failures the VM may convert into a `_catch` dispatch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::LoadFail | ErrorKind::MissingSymbol
        )
    }
}

impl From<StoreError> for RuntimeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => RuntimeError::NotFound(key),
            StoreError::UnsupportedVersion { found, .. } => {
                RuntimeError::UnsupportedVersion(found)
            }
            other => RuntimeError::ResolveFail {
                sym: String::new(),
                detail: other.to_string(),
            },
        }
    }
}
