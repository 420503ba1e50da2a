//! Page renderer.
//!
//! A page is a template body followed by an optional menu block,
//! composed within a byte budget. Template substitution is a single
//! pass over `{{.name}}` holes; substituted text is never re-scanned.
//!
//! Size policy: one page, deterministic. The menu is capped to the
//! smaller of the MSIZE budget and whatever the total budget leaves
//! after the body; whole entries that no longer fit are dropped from
//! the tail. A body alone exceeding the total budget is an error.

use crate::cache::Cache;
use crate::context::Context;
use crate::error::{ErrorKind, RuntimeError};
use crate::resource::Resource;
use tracing::debug;

/// One menu choice, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub selector: String,
    pub label: String,
}

/// Render state accumulated by one VM run: emitted menu entries, the
/// declared menu budget, and the symbols mapped for the page.
#[derive(Debug, Default)]
pub struct Page {
    menu: Vec<MenuEntry>,
    menu_size: u16,
    mapped: Vec<String>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a menu choice.
    pub fn menu_put(&mut self, selector: &str, label: &str) {
        self.menu.push(MenuEntry {
            selector: selector.to_string(),
            label: label.to_string(),
        });
    }

    /// Declare the menu byte budget (0 = unlimited).
    pub fn set_menu_size(&mut self, size: u16) {
        self.menu_size = size;
    }

    /// Mark a symbol as visible to the renderer for this page.
    pub fn map(&mut self, sym: &str) {
        if !self.mapped.iter().any(|s| s == sym) {
            self.mapped.push(sym.to_string());
        }
    }

    pub fn menu_entries(&self) -> &[MenuEntry] {
        &self.menu
    }

    pub fn mapped(&self) -> &[String] {
        &self.mapped
    }

    /// Clear per-turn accumulation.
    pub fn reset(&mut self) {
        self.menu.clear();
        self.menu_size = 0;
        self.mapped.clear();
    }

    /// Compose the page for `sym` within `size` total bytes (0 =
    /// unlimited). A node without a template renders its menu alone.
    pub fn render<R: Resource>(
        &self,
        ctx: &Context,
        resource: &R,
        cache: &Cache,
        sym: &str,
        size: usize,
    ) -> Result<String, RuntimeError> {
        let body = match resource.template_for(ctx, sym) {
            Ok(template) => substitute(&template, cache)?,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        if size > 0 && body.len() > size {
            return Err(RuntimeError::OverBudget {
                size: body.len(),
                budget: size,
            });
        }

        let menu_budget = self.effective_menu_budget(body.len(), size);
        let menu = self.render_menu(ctx, resource, menu_budget);

        Ok(match (body.is_empty(), menu.is_empty()) {
            (false, false) => format!("{body}\n{menu}"),
            (false, true) => body,
            (true, _) => menu,
        })
    }

    /// Bytes available to the menu block after the body and separator.
    fn effective_menu_budget(&self, body_len: usize, size: usize) -> usize {
        let declared = if self.menu_size > 0 {
            self.menu_size as usize
        } else {
            usize::MAX
        };
        let remaining = if size > 0 {
            size.saturating_sub(body_len).saturating_sub(1)
        } else {
            usize::MAX
        };
        declared.min(remaining)
    }

    /// Render `selector:label` lines, dropping whole entries from the
    /// tail once the budget is exhausted.
    fn render_menu<R: Resource>(&self, ctx: &Context, resource: &R, budget: usize) -> String {
        let mut out = String::new();
        for entry in &self.menu {
            // A label may be a lookup key for a translated display string.
            let label = match resource.menu_label(ctx, &entry.label) {
                Ok(resolved) => resolved,
                Err(_) => entry.label.clone(),
            };
            let line_len = entry.selector.len() + 1 + label.len();
            let needed = if out.is_empty() { line_len } else { line_len + 1 };
            if budget != usize::MAX && out.len() + needed > budget {
                debug!(
                    selector = entry.selector.as_str(),
                    budget, "menu entry dropped"
                );
                break;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&entry.selector);
            out.push(':');
            out.push_str(&label);
        }
        out
    }
}

/// Replace `{{.name}}` holes with cached values, single-pass.
fn substitute(template: &str, cache: &Cache) -> Result<String, RuntimeError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{.") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        let Some(end) = after.find("}}") else {
            // Unterminated hole passes through literally.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            let value = cache
                .get(name)
                .ok_or_else(|| RuntimeError::MissingSymbol(name.to_string()))?;
            out.push_str(&String::from_utf8_lossy(value));
        } else {
            out.push_str(&rest[start..start + 3 + end + 2]);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
