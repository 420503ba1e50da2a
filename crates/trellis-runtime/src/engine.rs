//! Session engine.
//!
//! Drives one turn at a time: accept input, run the held code buffer
//! (or resolve the current node's code), stop at HALT, render, persist.
//! A session's full state (navigation stack, flags, input, code
//! remainder and cache) round-trips through an attached store as one
//! opaque blob keyed by session id.

use crate::cache::Cache;
use crate::context::Context;
use crate::error::{ErrorKind, RuntimeError};
use crate::resource::Resource;
use crate::state::{State, FLAG_TERMINATE, FLAG_WAIT};
use crate::vm::{Vm, CATCH_SYM};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, warn};

/// Fallback page when even the reserved error template is missing.
const DEFAULT_ERROR_PAGE: &str = "An internal error occurred.";
/// Reserved template rendered on unrecoverable failure.
pub const ERROR_SYM: &str = "_error";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Entry node symbol.
    pub root: String,
    /// Session key for persistence; empty disables persistence.
    pub session_id: String,
    /// Number of application flags on top of the reserved range.
    pub flag_count: u16,
    /// Total cache budget in bytes (0 = unbounded).
    pub cache_size: usize,
    /// Total page budget in bytes (0 = unbounded).
    pub output_size: usize,
    /// Input length cap in bytes (0 = unlimited).
    pub input_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: "root".to_string(),
            session_id: String::new(),
            flag_count: 0,
            cache_size: 0,
            output_size: 0,
            input_size: crate::state::DEFAULT_INPUT_SIZE,
        }
    }
}

/// Serialized session blob.
#[derive(Serialize)]
struct SessionRef<'a> {
    state: &'a State,
    cache: &'a Cache,
}

#[derive(Deserialize)]
struct Session {
    state: State,
    cache: Cache,
}

/// One session's orchestrator: VM plus optional persistence.
pub struct Engine<R: Resource> {
    config: Config,
    vm: Vm<R>,
    store: Option<Box<dyn trellis_store::Store>>,
}

impl<R: Resource> Engine<R> {
    pub fn new(config: Config, resource: R) -> Self {
        let state = State::new(config.flag_count).with_input_size(config.input_size);
        let cache = Cache::with_size(config.cache_size);
        Self {
            vm: Vm::new(resource, state, cache),
            config,
            store: None,
        }
    }

    /// Attach a persistence backend. Sessions are stored under
    /// [`trellis_store::Prefix::State`] keyed by the configured id.
    pub fn with_store(mut self, store: Box<dyn trellis_store::Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &State {
        self.vm.state()
    }

    pub fn cache(&self) -> &Cache {
        self.vm.cache()
    }

    /// True once the session has been terminated by CROAK.
    pub fn terminated(&self) -> bool {
        self.vm.state().get_flag(FLAG_TERMINATE).unwrap_or(false)
    }

    /// Start or resume a session. Returns whether more input is wanted.
    ///
    /// A persisted session is restored verbatim; a fresh one enters the
    /// root node and runs its code. A root with no resolvable code is
    /// not an error: the session simply has nothing to continue with.
    pub fn init(&mut self, ctx: &Context) -> Result<bool, RuntimeError> {
        if self.restore(ctx)? {
            debug!(session = ctx.session_id(), "session restored");
            let st = self.vm.state();
            return Ok(st.get_flag(FLAG_WAIT)? || st.has_code());
        }

        let root = self.config.root.clone();
        self.vm.state_mut().down(&root);
        self.vm.cache_mut().push_frame();
        self.vm.page_mut().reset();

        let mut ctx = ctx.clone();
        ctx.set_node(&root);
        let code = match self.vm.resource().code_for(&ctx, &root) {
            Ok(code) => code,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(root = root.as_str(), "no code for root, nothing to run");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let cont = self.run_pending(&ctx, code)?;
        self.persist(&ctx)?;
        Ok(cont)
    }

    /// Execute one turn against the given input. Returns the continue
    /// bit: false once the session is finished or terminated.
    pub fn exec(&mut self, ctx: &Context, input: &[u8]) -> Result<bool, RuntimeError> {
        if self.terminated() {
            return Ok(false);
        }
        self.vm.state_mut().set_input(input)?;
        self.vm.page_mut().reset();

        let mut ctx = ctx.clone();
        ctx.set_input(input);
        if let Some((sym, _)) = self.vm.state().where_at() {
            let sym = sym.to_string();
            ctx.set_node(&sym);
        }

        let code = if self.vm.state().has_code() {
            self.vm.state_mut().take_code()
        } else {
            self.fetch_code(&mut ctx)?
        };

        match self.run_pending(&ctx, code) {
            Ok(cont) => {
                self.persist(&ctx)?;
                Ok(cont)
            }
            Err(e) if e.kind() == ErrorKind::Terminated => {
                self.persist(&ctx)?;
                Ok(false)
            }
            // The previously persisted state stays untouched; only the
            // terminal flag records that this session is beyond repair.
            Err(e) => {
                if Self::is_fatal_kind(e.kind()) {
                    let _ = self.vm.state_mut().set_flag(FLAG_TERMINATE);
                }
                Err(e)
            }
        }
    }

    /// Render the pending page into `sink`, returning the bytes written.
    ///
    /// On render failure the reserved error template (or a built-in
    /// single line) is written first so the driver always has output,
    /// then the failure is surfaced.
    pub fn write_result<W: Write>(
        &mut self,
        ctx: &Context,
        sink: &mut W,
    ) -> Result<usize, RuntimeError> {
        let sym = self
            .vm
            .state()
            .where_at()
            .map(|(s, _)| s.to_string())
            .unwrap_or_default();
        let mut ctx = ctx.clone();
        ctx.set_node(&sym);

        match self.vm.page().render(
            &ctx,
            self.vm.resource(),
            self.vm.cache(),
            &sym,
            self.config.output_size,
        ) {
            Ok(page) => {
                sink.write_all(page.as_bytes())
                    .map_err(|e| RuntimeError::ResolveFail {
                        sym: sym.clone(),
                        detail: format!("write failed: {e}"),
                    })?;
                Ok(page.len())
            }
            Err(e) => {
                warn!(error = %e, node = sym.as_str(), "render failed, writing error page");
                let fallback = self
                    .vm
                    .resource()
                    .template_for(&ctx, ERROR_SYM)
                    .unwrap_or_else(|_| DEFAULT_ERROR_PAGE.to_string());
                let _ = sink.write_all(fallback.as_bytes());
                Err(e)
            }
        }
    }

    /// Run code buffers until the session waits for input, terminates,
    /// or runs dry, following navigation to freshly resolved code.
    fn run_pending(&mut self, ctx: &Context, mut code: Vec<u8>) -> Result<bool, RuntimeError> {
        loop {
            if code.is_empty() {
                return Ok(false);
            }
            let before = self.position();
            let remainder = self.vm.run(code, ctx)?;
            self.vm.state_mut().save_code(remainder);

            let st = self.vm.state();
            if st.get_flag(FLAG_TERMINATE)? {
                return Ok(false);
            }
            if st.get_flag(FLAG_WAIT)? {
                return Ok(true);
            }
            if st.has_code() {
                code = self.vm.state_mut().take_code();
                continue;
            }
            // Ran dry without waiting: follow navigation if it moved.
            if self.position() == before {
                return Ok(false);
            }
            let mut ctx = ctx.clone();
            code = self.fetch_code(&mut ctx)?;
        }
    }

    /// Resolve code for the current node, falling back to the catch node
    /// when the content is missing.
    fn fetch_code(&mut self, ctx: &mut Context) -> Result<Vec<u8>, RuntimeError> {
        let sym = self
            .vm
            .state()
            .where_at()
            .map(|(s, _)| s.to_string())
            .unwrap_or_else(|| self.config.root.clone());
        ctx.set_node(&sym);

        match self.vm.resource().code_for(ctx, &sym) {
            Ok(code) => Ok(code),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match self.vm.resource().code_for(ctx, CATCH_SYM) {
                    Ok(code) if !code.is_empty() => {
                        debug!(sym = sym.as_str(), "code missing, diverting to catch");
                        self.vm
                            .state_mut()
                            .set_flag(crate::state::FLAG_INVALID)?;
                        self.vm.jump_replace(ctx, CATCH_SYM);
                        Ok(code)
                    }
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn position(&self) -> Option<(String, usize)> {
        self.vm
            .state()
            .where_at()
            .map(|(s, d)| (s.to_string(), d))
    }

    /// Failures that leave the session beyond continuing: malformed
    /// bytecode and cache contract violations signal a faulty bundle.
    fn is_fatal_kind(kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::BadInstruction
                | ErrorKind::TruncatedCode
                | ErrorKind::OverBudget
                | ErrorKind::DuplicateSymbol
        )
    }

    /// Write the session blob. A missing store or empty session id
    /// disables persistence.
    fn persist(&mut self, ctx: &Context) -> Result<(), RuntimeError> {
        if self.config.session_id.is_empty() {
            return Ok(());
        }
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        let blob = serde_json::to_vec(&SessionRef {
            state: self.vm.state(),
            cache: self.vm.cache(),
        })
        .map_err(|e| RuntimeError::ResolveFail {
            sym: self.config.session_id.clone(),
            detail: format!("session encode failed: {e}"),
        })?;
        store.put(
            trellis_store::Prefix::State,
            self.config.session_id.as_bytes(),
            &blob,
            ctx.lang(),
        )?;
        debug!(
            session = self.config.session_id.as_str(),
            bytes = blob.len(),
            "session persisted"
        );
        Ok(())
    }

    /// Load a persisted session, if any. Returns whether one was found.
    fn restore(&mut self, ctx: &Context) -> Result<bool, RuntimeError> {
        if self.config.session_id.is_empty() {
            return Ok(false);
        }
        let Some(store) = self.store.as_ref() else {
            return Ok(false);
        };
        let blob = match store.get(
            trellis_store::Prefix::State,
            self.config.session_id.as_bytes(),
            ctx.lang(),
        ) {
            Ok(blob) => blob,
            Err(trellis_store::StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let session: Session =
            serde_json::from_slice(&blob).map_err(|e| RuntimeError::ResolveFail {
                sym: self.config.session_id.clone(),
                detail: format!("session decode failed: {e}"),
            })?;
        *self.vm.state_mut() = session.state;
        *self.vm.cache_mut() = session.cache;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{append, Instr};
    use crate::resource::FnResource;

    fn line(buf: &mut Vec<u8>, instr: Instr) {
        append(buf, &instr).unwrap();
    }

    #[test]
    fn test_init_empty_resolver_does_not_continue() {
        let mut en = Engine::new(Config::default(), FnResource::new());
        let cont = en.init(&Context::new("s")).unwrap();
        assert!(!cont);
    }

    #[test]
    fn test_init_runs_root_code() {
        let mut rs = FnResource::new();
        let mut code = Vec::new();
        line(&mut code, Instr::MOut { selector: "1".into(), label: "go".into() });
        line(&mut code, Instr::Halt);
        rs.add_code("root", code);

        let mut en = Engine::new(Config::default(), rs);
        let cont = en.init(&Context::new("s")).unwrap();
        assert!(cont);
        assert_eq!(en.state().where_at(), Some(("root", 1)));
    }

    #[test]
    fn test_write_result_renders_template() {
        let mut rs = FnResource::new();
        let mut code = Vec::new();
        line(&mut code, Instr::Halt);
        rs.add_code("root", code);
        rs.add_template("root", "hello there");

        let mut en = Engine::new(Config::default(), rs);
        let ctx = Context::new("s");
        en.init(&ctx).unwrap();

        let mut out = Vec::new();
        let n = en.write_result(&ctx, &mut out).unwrap();
        assert_eq!(n, 11);
        assert_eq!(out, b"hello there");
    }

    #[test]
    fn test_write_result_falls_back_to_error_page() {
        let mut rs = FnResource::new();
        let mut code = Vec::new();
        line(&mut code, Instr::Halt);
        rs.add_code("root", code);
        // Template references a symbol that was never loaded.
        rs.add_template("root", "broken {{.ghost}}");

        let mut en = Engine::new(Config::default(), rs);
        let ctx = Context::new("s");
        en.init(&ctx).unwrap();

        let mut out = Vec::new();
        let err = en.write_result(&ctx, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingSymbol);
        assert_eq!(out, DEFAULT_ERROR_PAGE.as_bytes());
    }

    #[test]
    fn test_exec_after_terminate_is_a_noop() {
        let mut en = Engine::new(Config::default(), FnResource::new());
        en.init(&Context::new("s")).unwrap();
        // Force the terminate flag as CROAK would.
        let _ = en.vm.state_mut().down("root");
        en.vm.state_mut().set_flag(FLAG_TERMINATE).unwrap();

        let cont = en.exec(&Context::new("s"), b"1").unwrap();
        assert!(!cont);
    }
}
