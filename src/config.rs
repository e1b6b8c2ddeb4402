use serde::{Deserialize, Serialize};
use std::path::Path;

/// Controls workspace scanning behavior (what to skip).
///
/// Note: `.gitignore` is always respected by the scanner; these are additional
/// hard skips for noisy directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in the tree (e.g. "generated", "tmp").
    ///
    /// These are compared against path components, not full paths.
    pub exclude_dir_names: Vec<String>,
}

/// Hard safety ceiling: files larger than this are **always** skipped, regardless of config.
/// Keeps tree-sitter away from multi-megabyte bundles that slipped past the ignore rules.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Doc tag that marks an extension point (`@namespace Foo/Bar`).
    pub annotation_keyword: String,
    /// Files whose name contains this marker are parsed as plugin registrations.
    pub plugin_file_marker: String,
    pub scan: ScanConfig,
    pub max_file_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            annotation_keyword: "namespace".to_string(),
            plugin_file_marker: ".plugin".to_string(),
            scan: ScanConfig::default(),
            // 512 KB default: enough for any hand-written source file.
            max_file_bytes: 512 * 1024,
        }
    }
}

impl Config {
    pub fn effective_max_file_bytes(&self) -> u64 {
        self.max_file_bytes.min(ABSOLUTE_MAX_FILE_BYTES)
    }
}

pub const CONFIG_FILE_NAME: &str = ".nsxref.json";

pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(CONFIG_FILE_NAME);

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|e| {
        tracing::warn!("ignoring malformed {}: {e}", primary.display());
        Config::default()
    })
}
