//! Resource resolver contract and bundled implementations.
//!
//! A [`Resource`] supplies everything the VM consumes from the outside:
//! node bytecode, page templates, menu labels, and dynamic values. The
//! VM never assumes caching behavior of a resolver; it may be long-lived
//! and shared across sessions.
//!
//! [`FnResource`] is the in-memory implementation for tests and
//! embedders: static code/template/menu tables plus registered entry
//! functions. [`StoreResource`] serves a content bundle out of a
//! [`trellis_store::Store`], optionally combined with entry functions.

use crate::context::Context;
use crate::error::RuntimeError;
use std::collections::HashMap;
use trellis_store::{Prefix, Store};

/// A registered dynamic-value function.
///
/// Entry functions receive the call context; the input-symbol convention
/// is an entry function returning `ctx.input()`.
pub type EntryFn = Box<dyn Fn(&Context) -> Result<Vec<u8>, RuntimeError> + Send + Sync>;

/// External content lookup consumed by the VM.
pub trait Resource {
    /// Bytecode for a node symbol. `NotFound` when the symbol has no code.
    fn code_for(&self, ctx: &Context, sym: &str) -> Result<Vec<u8>, RuntimeError>;

    /// Page template for a node symbol.
    fn template_for(&self, ctx: &Context, sym: &str) -> Result<String, RuntimeError>;

    /// Display label for a menu choice key.
    fn menu_label(&self, ctx: &Context, sym: &str) -> Result<String, RuntimeError>;

    /// Dynamic value for a symbol. Failures surface as `ResolveFail`.
    fn value_of(&self, ctx: &Context, sym: &str) -> Result<Vec<u8>, RuntimeError>;
}

/// In-memory resolver backed by maps and registered closures.
#[derive(Default)]
pub struct FnResource {
    code: HashMap<String, Vec<u8>>,
    templates: HashMap<String, String>,
    menus: HashMap<String, String>,
    funcs: HashMap<String, EntryFn>,
}

impl FnResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code(&mut self, sym: &str, code: Vec<u8>) {
        self.code.insert(sym.to_string(), code);
    }

    pub fn add_template(&mut self, sym: &str, template: &str) {
        self.templates.insert(sym.to_string(), template.to_string());
    }

    pub fn add_menu(&mut self, sym: &str, label: &str) {
        self.menus.insert(sym.to_string(), label.to_string());
    }

    /// Register an entry function for a dynamic-value symbol.
    pub fn register<F>(&mut self, sym: &str, f: F)
    where
        F: Fn(&Context) -> Result<Vec<u8>, RuntimeError> + Send + Sync + 'static,
    {
        self.funcs.insert(sym.to_string(), Box::new(f));
    }
}

impl Resource for FnResource {
    fn code_for(&self, _ctx: &Context, sym: &str) -> Result<Vec<u8>, RuntimeError> {
        self.code
            .get(sym)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(sym.to_string()))
    }

    fn template_for(&self, _ctx: &Context, sym: &str) -> Result<String, RuntimeError> {
        self.templates
            .get(sym)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(sym.to_string()))
    }

    fn menu_label(&self, _ctx: &Context, sym: &str) -> Result<String, RuntimeError> {
        self.menus
            .get(sym)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(sym.to_string()))
    }

    fn value_of(&self, ctx: &Context, sym: &str) -> Result<Vec<u8>, RuntimeError> {
        let f = self.funcs.get(sym).ok_or_else(|| RuntimeError::ResolveFail {
            sym: sym.to_string(),
            detail: "no entry function registered".to_string(),
        })?;
        f(ctx).map_err(|e| RuntimeError::ResolveFail {
            sym: sym.to_string(),
            detail: e.to_string(),
        })
    }
}

/// Resolver serving a content bundle from a store.
///
/// Bytecode is read from the `Bin` namespace, templates from `Template`
/// and labels from `Menu`; the store applies its own translation
/// preference using the context language. Dynamic values still come from
/// registered entry functions.
pub struct StoreResource<S: Store> {
    store: S,
    funcs: HashMap<String, EntryFn>,
}

impl<S: Store> StoreResource<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            funcs: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, sym: &str, f: F)
    where
        F: Fn(&Context) -> Result<Vec<u8>, RuntimeError> + Send + Sync + 'static,
    {
        self.funcs.insert(sym.to_string(), Box::new(f));
    }
}

impl<S: Store> Resource for StoreResource<S> {
    fn code_for(&self, ctx: &Context, sym: &str) -> Result<Vec<u8>, RuntimeError> {
        Ok(self.store.get(Prefix::Bin, sym.as_bytes(), ctx.lang())?)
    }

    fn template_for(&self, ctx: &Context, sym: &str) -> Result<String, RuntimeError> {
        let raw = self.store.get(Prefix::Template, sym.as_bytes(), ctx.lang())?;
        String::from_utf8(raw).map_err(|e| RuntimeError::ResolveFail {
            sym: sym.to_string(),
            detail: format!("template is not valid utf-8: {e}"),
        })
    }

    fn menu_label(&self, ctx: &Context, sym: &str) -> Result<String, RuntimeError> {
        let raw = self.store.get(Prefix::Menu, sym.as_bytes(), ctx.lang())?;
        String::from_utf8(raw).map_err(|e| RuntimeError::ResolveFail {
            sym: sym.to_string(),
            detail: format!("menu label is not valid utf-8: {e}"),
        })
    }

    fn value_of(&self, ctx: &Context, sym: &str) -> Result<Vec<u8>, RuntimeError> {
        if let Some(f) = self.funcs.get(sym) {
            return f(ctx).map_err(|e| RuntimeError::ResolveFail {
                sym: sym.to_string(),
                detail: e.to_string(),
            });
        }
        // Fall back to values installed with the bundle.
        Ok(self.store.get(Prefix::StaticLoad, sym.as_bytes(), ctx.lang())?)
    }
}
