//! Bytecode virtual machine.
//!
//! Owns the state register, the symbol cache and the page under
//! construction; consumes instructions sequentially until HALT or
//! end-of-buffer and returns the unconsumed remainder for persistence.
//!
//! Recoverable failures (an unmatched input, missing content) divert to
//! the reserved `_catch` node, which replaces the current navigation
//! frame rather than nesting under it.

use crate::bytecode::{self, Instr};
use crate::cache::Cache;
use crate::context::Context;
use crate::error::RuntimeError;
use crate::render::Page;
use crate::resource::Resource;
use crate::state::{
    State, FLAG_INMATCH, FLAG_INVALID, FLAG_LOADFAIL, FLAG_READIN, FLAG_TERMINATE, FLAG_WAIT,
};
use tracing::{debug, trace};

/// Reserved node dispatched to on recoverable failure.
pub const CATCH_SYM: &str = "_catch";
/// INCMP pattern matching any non-empty input.
pub const INPUT_WILDCARD: &str = "*";
/// INCMP target popping one navigation frame instead of pushing.
pub const TARGET_BACK: &str = "_";

/// The virtual machine for one session.
pub struct Vm<R: Resource> {
    state: State,
    cache: Cache,
    page: Page,
    resource: R,
}

impl<R: Resource> Vm<R> {
    pub fn new(resource: R, state: State, cache: Cache) -> Self {
        Self {
            state,
            cache,
            page: Page::new(),
            resource,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Execute a code buffer until HALT or end-of-buffer, returning the
    /// unconsumed tail.
    ///
    /// The cancellation token is checked between instructions; on
    /// cancellation the remainder is saved into the state register and
    /// `Canceled` is returned.
    pub fn run(&mut self, code: Vec<u8>, ctx: &Context) -> Result<Vec<u8>, RuntimeError> {
        let mut ctx = ctx.clone();
        if let Some((sym, _)) = self.state.where_at() {
            ctx.set_node(sym);
        }
        ctx.set_input(self.state.get_input());

        for flag in [FLAG_READIN, FLAG_INMATCH, FLAG_WAIT, FLAG_LOADFAIL, FLAG_INVALID] {
            self.state.reset_flag(flag)?;
        }

        let mut buf = code;
        let mut pos = 0usize;
        let mut in_catch = false;

        loop {
            if pos >= buf.len() {
                // Input-expecting buffer exhausted without a match.
                if !in_catch
                    && self.state.get_flag(FLAG_READIN)?
                    && !self.state.get_flag(FLAG_INMATCH)?
                {
                    self.state.set_flag(FLAG_INVALID)?;
                    debug!(node = ctx.node(), "input matched nothing, running catch");
                    buf = self.dispatch_catch(&mut ctx)?;
                    pos = 0;
                    in_catch = true;
                    continue;
                }
                return Ok(Vec::new());
            }
            if ctx.canceled() {
                self.state.save_code(buf[pos..].to_vec());
                return Err(RuntimeError::Canceled);
            }

            let (instr, rest) = bytecode::next(&buf[pos..])?;
            pos = buf.len() - rest.len();
            trace!(op = instr.opcode().mnemonic(), pos, "exec");

            match instr {
                Instr::Noop => {}
                Instr::Halt => {
                    self.state.set_flag(FLAG_WAIT)?;
                    return Ok(buf[pos..].to_vec());
                }
                Instr::Move { sym } => {
                    self.do_move(&mut ctx, &sym);
                }
                Instr::Load { sym, size } => {
                    let value = match self.resource.value_of(&ctx, &sym) {
                        Ok(v) => v,
                        Err(e) => {
                            // The turn still renders: honor HALT semantics.
                            self.state.set_flag(FLAG_LOADFAIL)?;
                            self.state.set_flag(FLAG_WAIT)?;
                            return Err(RuntimeError::LoadFail {
                                sym,
                                detail: e.to_string(),
                            });
                        }
                    };
                    trace!(sym = sym.as_str(), len = value.len(), "load");
                    self.cache.add(&sym, value, size)?;
                }
                Instr::Reload { sym } => {
                    let value = match self.resource.value_of(&ctx, &sym) {
                        Ok(v) => v,
                        Err(e) => {
                            self.state.set_flag(FLAG_LOADFAIL)?;
                            self.state.set_flag(FLAG_WAIT)?;
                            return Err(RuntimeError::LoadFail {
                                sym,
                                detail: e.to_string(),
                            });
                        }
                    };
                    self.cache.update(&sym, value)?;
                }
                Instr::Map { sym } => {
                    if !self.cache.contains(&sym) {
                        return Err(RuntimeError::UnknownSymbol(sym));
                    }
                    self.page.map(&sym);
                }
                Instr::MSize { size } => {
                    self.page.set_menu_size(size);
                }
                Instr::MOut { selector, label } => {
                    self.page.menu_put(&selector, &label);
                }
                Instr::InCmp { pattern, target } => {
                    self.state.set_flag(FLAG_READIN)?;
                    let input = self.state.get_input();
                    let matched = match pattern.as_str() {
                        INPUT_WILDCARD => !input.is_empty(),
                        p => input == p.as_bytes(),
                    };
                    if !matched {
                        continue;
                    }
                    self.state.set_flag(FLAG_INMATCH)?;
                    debug!(
                        pattern = pattern.as_str(),
                        target = target.as_str(),
                        "input matched"
                    );
                    if target == TARGET_BACK {
                        self.state.up()?;
                        self.cache.pop_frame();
                        self.state.clear_input();
                        if let Some((sym, _)) = self.state.where_at() {
                            let sym = sym.to_string();
                            ctx.set_node(&sym);
                        }
                    } else {
                        self.do_move(&mut ctx, &target);
                    }
                    // Siblings through the next HALT are skipped.
                    pos = skip_to_halt(&buf, pos)?;
                    return Ok(buf[pos..].to_vec());
                }
                Instr::Catch { sym, flag, invert } => {
                    if self.state.get_flag(flag)? != invert {
                        debug!(sym = sym.as_str(), flag, invert, "catch branch taken");
                        self.jump_replace(&mut ctx, &sym);
                        buf = self.resource.code_for(&ctx, &sym)?;
                        pos = 0;
                        in_catch = true;
                    }
                }
                Instr::Croak { flag, invert } => {
                    if self.state.get_flag(flag)? != invert {
                        debug!(flag, invert, "croak: terminating session");
                        self.state.restart();
                        self.cache.reset();
                        self.state.set_flag(FLAG_TERMINATE)?;
                        return Err(RuntimeError::Terminated);
                    }
                }
            }
        }
    }

    /// Push a navigation frame and its paired cache frame.
    fn do_move(&mut self, ctx: &mut Context, sym: &str) {
        let depth = self.state.down(sym);
        self.cache.push_frame();
        ctx.set_node(sym);
        trace!(sym, depth, "move");
    }

    /// Replace the top navigation frame, cycling its cache frame.
    pub(crate) fn jump_replace(&mut self, ctx: &mut Context, sym: &str) {
        self.state.replace_top(sym);
        self.cache.pop_frame();
        self.cache.push_frame();
        ctx.set_node(sym);
    }

    /// Divert to the reserved catch node and return its code.
    fn dispatch_catch(&mut self, ctx: &mut Context) -> Result<Vec<u8>, RuntimeError> {
        self.jump_replace(ctx, CATCH_SYM);
        self.resource.code_for(ctx, CATCH_SYM)
    }
}

/// Advance past every instruction up to and including the next HALT.
fn skip_to_halt(buf: &[u8], mut pos: usize) -> Result<usize, RuntimeError> {
    while pos < buf.len() {
        let (instr, rest) = bytecode::next(&buf[pos..])?;
        pos = buf.len() - rest.len();
        if matches!(instr, Instr::Halt) {
            break;
        }
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::append;
    use crate::context::CancelToken;
    use crate::error::ErrorKind;
    use crate::resource::FnResource;
    use crate::state::FLAG_USERSTART;

    fn line(buf: &mut Vec<u8>, instr: Instr) {
        append(buf, &instr).unwrap();
    }

    fn test_resource() -> FnResource {
        let mut rs = FnResource::new();
        rs.register("one", |_| Ok(b"one".to_vec()));
        rs.register("two", |_| Ok(b"two".to_vec()));
        rs.register("fail", |_| {
            Err(RuntimeError::ResolveFail {
                sym: "fail".into(),
                detail: "backend gone".into(),
            })
        });
        let mut catch_code = Vec::new();
        line(&mut catch_code, Instr::MOut {
            selector: "0".into(),
            label: "repent".into(),
        });
        line(&mut catch_code, Instr::Halt);
        rs.add_code(CATCH_SYM, catch_code);
        rs
    }

    fn new_vm() -> Vm<FnResource> {
        Vm::new(test_resource(), State::new(4), Cache::new())
    }

    #[test]
    fn test_run_move_halt() {
        let mut vm = new_vm();
        let mut b = Vec::new();
        line(&mut b, Instr::Move { sym: "foo".into() });
        line(&mut b, Instr::Halt);

        let rem = vm.run(b, &Context::new("s")).unwrap();
        assert!(rem.is_empty());
        assert_eq!(vm.state().where_at(), Some(("foo", 1)));
        assert!(vm.state().get_flag(FLAG_WAIT).unwrap());
    }

    #[test]
    fn test_run_invalid_opcode() {
        let mut vm = new_vm();
        let err = vm.run(vec![0x01, 0x02], &Context::new("s")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInstruction);
    }

    #[test]
    fn test_load_and_cache() {
        let mut vm = new_vm();
        vm.state_mut().down("root");
        vm.cache_mut().push_frame();

        let mut b = Vec::new();
        line(&mut b, Instr::Load { sym: "one".into(), size: 10 });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();

        assert_eq!(vm.cache().get("one"), Some(&b"one"[..]));
    }

    #[test]
    fn test_load_failure_keeps_halt_semantics() {
        let mut vm = new_vm();
        vm.state_mut().down("root");

        let mut b = Vec::new();
        line(&mut b, Instr::Load { sym: "fail".into(), size: 0 });
        line(&mut b, Instr::Halt);
        let err = vm.run(b, &Context::new("s")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LoadFail);
        assert!(vm.state().get_flag(FLAG_LOADFAIL).unwrap());
        assert!(vm.state().get_flag(FLAG_WAIT).unwrap());
    }

    #[test]
    fn test_halt_truncates_and_preserves_remainder() {
        let mut vm = new_vm();
        let mut b = Vec::new();
        line(&mut b, Instr::Move { sym: "root".into() });
        line(&mut b, Instr::Load { sym: "one".into(), size: 0 });
        line(&mut b, Instr::Halt);
        line(&mut b, Instr::Move { sym: "foo".into() });

        let rem = vm.run(b, &Context::new("s")).unwrap();
        let (sym, _) = vm.state().where_at().unwrap();
        assert_ne!(sym, "foo");
        // Remainder begins with the MOVE opcode.
        assert_eq!(&rem[..2], [0x00, 0x06]);
    }

    #[test]
    fn test_reload_overwrites() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let flipped = Arc::new(AtomicBool::new(false));
        let mut rs = test_resource();
        let flip = flipped.clone();
        rs.register("dyn", move |_| {
            if flip.swap(true, Ordering::Relaxed) {
                Ok(b"baz".to_vec())
            } else {
                Ok(b"three".to_vec())
            }
        });
        let mut vm = Vm::new(rs, State::new(4), Cache::new());
        vm.state_mut().down("root");

        let mut b = Vec::new();
        line(&mut b, Instr::Load { sym: "dyn".into(), size: 0 });
        line(&mut b, Instr::Map { sym: "dyn".into() });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();
        assert_eq!(vm.cache().get("dyn"), Some(&b"three"[..]));

        let mut b = Vec::new();
        line(&mut b, Instr::Reload { sym: "dyn".into() });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();
        assert_eq!(vm.cache().get("dyn"), Some(&b"baz"[..]));
    }

    #[test]
    fn test_map_unknown_symbol() {
        let mut vm = new_vm();
        let mut b = Vec::new();
        line(&mut b, Instr::Map { sym: "ghost".into() });
        let err = vm.run(b, &Context::new("s")).unwrap_err();
        assert_eq!(err, RuntimeError::UnknownSymbol("ghost".into()));
    }

    #[test]
    fn test_incmp_match_moves_and_skips_siblings() {
        let mut vm = new_vm();
        vm.state_mut().down("root");
        vm.state_mut().set_input(b"baz").unwrap();

        let mut b = Vec::new();
        line(&mut b, Instr::InCmp { pattern: "bar".into(), target: "aiee".into() });
        line(&mut b, Instr::InCmp { pattern: "baz".into(), target: "foo".into() });
        line(&mut b, Instr::Load { sym: "one".into(), size: 0 });
        line(&mut b, Instr::Halt);

        let rem = vm.run(b, &Context::new("s")).unwrap();
        assert!(rem.is_empty());
        assert_eq!(vm.state().where_at(), Some(("foo", 2)));
        // The skipped LOAD must not have run.
        assert!(!vm.cache().contains("one"));
    }

    #[test]
    fn test_incmp_wildcard_matches_nonempty() {
        let mut vm = new_vm();
        vm.state_mut().down("root");
        vm.state_mut().set_input(b"anything").unwrap();

        let mut b = Vec::new();
        line(&mut b, Instr::InCmp { pattern: "*".into(), target: "sink".into() });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();
        assert_eq!(vm.state().where_at(), Some(("sink", 2)));
    }

    #[test]
    fn test_incmp_wildcard_ignores_empty() {
        let mut vm = new_vm();
        vm.state_mut().down("root");

        let mut b = Vec::new();
        line(&mut b, Instr::InCmp { pattern: "*".into(), target: "sink".into() });
        vm.run(b, &Context::new("s")).unwrap();
        // No match, no input expected handling for empty wildcard: catch.
        assert_eq!(vm.state().where_at(), Some((CATCH_SYM, 1)));
    }

    #[test]
    fn test_incmp_empty_pattern_matches_empty_input() {
        let mut vm = new_vm();
        vm.state_mut().down("root");

        let mut b = Vec::new();
        line(&mut b, Instr::InCmp { pattern: "".into(), target: "start".into() });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();
        assert_eq!(vm.state().where_at(), Some(("start", 2)));
    }

    #[test]
    fn test_incmp_back_target_pops() {
        let mut vm = new_vm();
        vm.state_mut().down("root");
        vm.cache_mut().push_frame();
        vm.state_mut().down("detail");
        vm.cache_mut().push_frame();
        vm.state_mut().set_input(b"0").unwrap();

        let mut b = Vec::new();
        line(&mut b, Instr::InCmp { pattern: "0".into(), target: TARGET_BACK.into() });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();
        assert_eq!(vm.state().where_at(), Some(("root", 1)));
    }

    #[test]
    fn test_unmatched_input_diverts_to_catch() {
        let mut vm = new_vm();
        vm.state_mut().down("root");
        vm.state_mut().set_input(b"foo").unwrap();

        let mut b = Vec::new();
        line(&mut b, Instr::InCmp { pattern: "bar".into(), target: "baz".into() });
        let rem = vm.run(b, &Context::new("s")).unwrap();

        assert!(rem.is_empty());
        assert_eq!(vm.state().where_at(), Some((CATCH_SYM, 1)));
        assert!(vm.state().get_flag(FLAG_INVALID).unwrap());
        // The catch code emitted its menu and halted.
        assert_eq!(vm.page().menu_entries().len(), 1);
        assert!(vm.state().get_flag(FLAG_WAIT).unwrap());
    }

    #[test]
    fn test_catch_opcode_replaces_frame() {
        let mut vm = new_vm();
        vm.state_mut().down("root");
        vm.state_mut().down("menu");
        vm.state_mut().set_flag(FLAG_USERSTART).unwrap();

        let mut b = Vec::new();
        line(&mut b, Instr::Catch {
            sym: CATCH_SYM.into(),
            flag: FLAG_USERSTART,
            invert: false,
        });
        line(&mut b, Instr::Move { sym: "unreachable".into() });
        vm.run(b, &Context::new("s")).unwrap();

        // Replacement, not nesting; the rest of the buffer is discarded.
        assert_eq!(vm.state().where_at(), Some((CATCH_SYM, 2)));
        assert!(vm.state().get_flag(FLAG_WAIT).unwrap());
    }

    #[test]
    fn test_catch_not_taken_when_flag_clear() {
        let mut vm = new_vm();
        vm.state_mut().down("root");

        let mut b = Vec::new();
        line(&mut b, Instr::Catch {
            sym: CATCH_SYM.into(),
            flag: FLAG_USERSTART,
            invert: false,
        });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();
        assert_eq!(vm.state().where_at(), Some(("root", 1)));
    }

    #[test]
    fn test_catch_inverted_condition() {
        let mut vm = new_vm();
        vm.state_mut().down("root");

        // Flag clear + invert = branch taken.
        let mut b = Vec::new();
        line(&mut b, Instr::Catch {
            sym: CATCH_SYM.into(),
            flag: FLAG_USERSTART,
            invert: true,
        });
        vm.run(b, &Context::new("s")).unwrap();
        assert_eq!(vm.state().where_at(), Some((CATCH_SYM, 1)));
    }

    #[test]
    fn test_croak_terminates_and_wipes() {
        let mut vm = new_vm();
        vm.state_mut().down("root");
        vm.state_mut().down("deep");
        vm.cache_mut().push_frame();
        vm.cache_mut().add("x", b"1".to_vec(), 0).unwrap();
        vm.state_mut().set_flag(FLAG_USERSTART).unwrap();

        let mut b = Vec::new();
        line(&mut b, Instr::Croak {
            flag: FLAG_USERSTART,
            invert: false,
        });
        let err = vm.run(b, &Context::new("s")).unwrap_err();

        assert_eq!(err, RuntimeError::Terminated);
        assert!(vm.state().get_flag(FLAG_TERMINATE).unwrap());
        assert_eq!(vm.state().depth(), 1);
        assert!(!vm.cache().contains("x"));
    }

    #[test]
    fn test_cancel_preserves_remainder() {
        let token = CancelToken::new();
        token.cancel();
        let ctx = Context::new("s").with_cancel(token);

        let mut vm = new_vm();
        let mut b = Vec::new();
        line(&mut b, Instr::Move { sym: "foo".into() });
        line(&mut b, Instr::Halt);

        let err = vm.run(b.clone(), &ctx).unwrap_err();
        assert_eq!(err, RuntimeError::Canceled);
        // Nothing executed; the whole buffer is preserved.
        assert_eq!(vm.state().code(), &b[..]);
    }

    #[test]
    fn test_msize_and_mout_accumulate() {
        let mut vm = new_vm();
        let mut b = Vec::new();
        line(&mut b, Instr::MSize { size: 160 });
        line(&mut b, Instr::MOut { selector: "0".into(), label: "one".into() });
        line(&mut b, Instr::MOut { selector: "1".into(), label: "two".into() });
        line(&mut b, Instr::Halt);
        vm.run(b, &Context::new("s")).unwrap();

        let entries = vm.page().menu_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].selector, "0");
        assert_eq!(entries[1].label, "two");
    }

    #[test]
    fn test_noop_advances() {
        let mut vm = new_vm();
        let mut b = Vec::new();
        line(&mut b, Instr::Noop);
        line(&mut b, Instr::Halt);
        let rem = vm.run(b, &Context::new("s")).unwrap();
        assert!(rem.is_empty());
    }
}
