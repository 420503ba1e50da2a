//! Bundle configuration.
//!
//! A content bundle may carry a `trellis.toml` next to its content
//! files, setting session parameters the flags don't. Precedence:
//! CLI flags, then the file, then `TRELLIS_ROOT` for the entry symbol.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::path::Path;

/// Optional `trellis.toml` contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleConfig {
    /// Entry node symbol.
    pub root: Option<String>,
    /// Application flag count.
    pub flag_count: Option<u16>,
    /// Cache budget in bytes.
    pub cache_size: Option<usize>,
    /// Page budget in bytes.
    pub output_size: Option<usize>,
    /// Input length cap in bytes.
    pub input_size: Option<usize>,
    /// Default content language.
    pub lang: Option<String>,
}

impl BundleConfig {
    /// Load `trellis.toml` from the bundle directory; a missing file
    /// yields the default configuration.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("trellis.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid TOML in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let cfg = BundleConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.root, None);
        assert_eq!(cfg.flag_count, None);
    }

    #[test]
    fn test_load_bundle_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("trellis.toml"),
            r#"
root = "main"
flag_count = 4
output_size = 160
"#,
        )
        .unwrap();

        let cfg = BundleConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.root.as_deref(), Some("main"));
        assert_eq!(cfg.flag_count, Some(4));
        assert_eq!(cfg.output_size, Some(160));
        assert_eq!(cfg.cache_size, None);
        assert_eq!(cfg.input_size, None);
    }

    #[test]
    fn test_load_input_size() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("trellis.toml"),
            r#"
input_size = 20
"#,
        )
        .unwrap();

        let cfg = BundleConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.input_size, Some(20));
        assert_eq!(cfg.output_size, None);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("trellis.toml"), "root = [broken").unwrap();
        assert!(BundleConfig::load(dir.path()).is_err());
    }
}
