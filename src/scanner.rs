use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

use crate::syntax::is_supported_path;

fn default_overrides(repo_root: &Path, exclude_dir_names: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(repo_root);

    // Note: For directories, include patterns for both the directory entry and its descendants,
    // otherwise walkers may still descend into the directory.

    // Bundled / generated JavaScript
    ob.add("!**/*.min.js")?;
    ob.add("!**/*.bundle.js")?;

    for d in [
        ".git",
        "node_modules",
        "dist",
        "build",
        "coverage",
        ".next",
        ".nuxt",
        ".cache",
        "out",
        "target",
    ] {
        ob.add(&format!("!**/{d}"))?;
        ob.add(&format!("!**/{d}/**"))?;
    }

    // Project-specific excluded dirs
    for d in exclude_dir_names {
        let d = d.trim().trim_matches('/');
        if d.is_empty() {
            continue;
        }
        ob.add(&format!("!**/{d}"))?;
        ob.add(&format!("!**/{d}/**"))?;
    }

    Ok(ob.build()?)
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub repo_root: PathBuf,
    pub max_file_bytes: u64,
    pub exclude_dir_names: Vec<String>,
}

/// Every parseable source file under the repo root, sorted by relative path.
pub fn scan_workspace(opts: &ScanOptions) -> Result<Vec<FileEntry>> {
    let meta = std::fs::metadata(&opts.repo_root)
        .with_context(|| format!("Root does not exist: {}", opts.repo_root.display()))?;

    if meta.is_file() {
        return scan_single_file(&opts.repo_root, opts.max_file_bytes);
    }

    let mut entries = Vec::new();
    let overrides = default_overrides(&opts.repo_root, &opts.exclude_dir_names)?;
    let walker = WalkBuilder::new(&opts.repo_root)
        .standard_filters(true) // .gitignore, .ignore, hidden, etc.
        .overrides(overrides)
        .build();

    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("walk error: {e}");
                continue;
            }
        };

        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();
        if !is_supported_path(&abs_path) {
            continue;
        }

        let bytes = match std::fs::metadata(&abs_path).map(|m| m.len()) {
            Ok(b) => b,
            Err(_) => continue,
        };

        if bytes > opts.max_file_bytes {
            tracing::debug!("skipping oversized file {}", abs_path.display());
            continue;
        }

        let rel_path = path_relative_to(&abs_path, &opts.repo_root)
            .with_context(|| format!("Failed to relativize path: {}", abs_path.display()))?;

        entries.push(FileEntry {
            abs_path,
            rel_path,
            bytes,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn scan_single_file(abs_path: &Path, max_file_bytes: u64) -> Result<Vec<FileEntry>> {
    if !is_supported_path(abs_path) {
        return Ok(vec![]);
    }

    let bytes = std::fs::metadata(abs_path)?.len();
    if bytes > max_file_bytes {
        return Ok(vec![]);
    }

    let rel_path = abs_path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| abs_path.to_path_buf());
    Ok(vec![FileEntry {
        abs_path: abs_path.to_path_buf(),
        rel_path,
        bytes,
    }])
}

fn path_relative_to(path: &Path, base: &Path) -> Result<PathBuf> {
    let rel = path
        .strip_prefix(base)
        .with_context(|| format!("{} is not under {}", path.display(), base.display()))?;
    Ok(rel.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, body).unwrap();
    }

    #[test]
    fn finds_sources_and_skips_noise() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/b.ts", "export {};");
        write(root, "src/a.plugin.js", "export default {};");
        write(root, "src/readme.md", "# nope");
        write(root, "node_modules/pkg/index.js", "module.exports = {};");
        write(root, "dist/app.min.js", "x");
        write(root, "vendor/lib.ts", "export {};");

        let entries = scan_workspace(&ScanOptions {
            repo_root: root.to_path_buf(),
            max_file_bytes: 1024,
            exclude_dir_names: vec!["vendor".into()],
        })
        .unwrap();

        let rels: Vec<String> = entries
            .iter()
            .map(|e| e.rel_path.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rels, vec!["src/a.plugin.js", "src/b.ts"]);
    }

    #[test]
    fn oversized_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "big.ts", &"x".repeat(200));
        let entries = scan_workspace(&ScanOptions {
            repo_root: dir.path().to_path_buf(),
            max_file_bytes: 100,
            exclude_dir_names: vec![],
        })
        .unwrap();
        assert!(entries.is_empty());
    }
}
