//! Per-turn execution context.
//!
//! A [`Context`] travels with every resolver call: it identifies the
//! session, carries a copy of the current input, and holds the
//! cooperative cancellation token the VM checks between instructions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation signal shared between a driver and a running engine.
///
/// Cloning shares the underlying flag. The VM polls it between
/// instructions; it never interrupts one mid-execution.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of any run sharing this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Call context handed to resolvers and the VM.
#[derive(Debug, Clone, Default)]
pub struct Context {
    session_id: String,
    node: String,
    input: Vec<u8>,
    lang: Option<String>,
    cancel: CancelToken,
}

impl Context {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Attach a language tag; translation-aware resolvers prefer records
    /// tagged with it.
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Attach a cancellation token shared with the driver.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Symbol of the node being executed. Updated by the engine at the
    /// start of each turn and by the VM when navigation moves.
    pub fn node(&self) -> &str {
        &self.node
    }

    pub(crate) fn set_node(&mut self, node: &str) {
        self.node = node.to_string();
    }

    /// The current turn's input. Entry functions implementing the
    /// input-symbol convention read it from here.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub(crate) fn set_input(&mut self, input: &[u8]) {
        self.input = input.to_vec();
    }

    pub fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }

    pub fn canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}
