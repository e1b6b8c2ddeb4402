//! The set of parsed source files the index reads from.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::Config;
use crate::declaration::{find_class_in_tree, ClassLookup};
use crate::scanner::{scan_workspace, ScanOptions};
use crate::syntax::{is_supported_path, NodeId, SyntaxTree};

/// Outcome of [`TreeProvider::reload_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// Tracked, content identical to the last parse.
    Unchanged,
    Updated,
    /// Was not tracked; now is.
    Added,
    /// Was tracked; gone from disk, now dropped.
    Removed,
    /// Neither tracked nor loadable.
    Missing,
}

/// Source of syntax trees for the index.
pub trait TreeProvider: ClassLookup {
    /// Tracked files in project order.
    fn source_files(&self) -> Vec<PathBuf>;

    fn source_file(&self, path: &Path) -> Option<&SyntaxTree>;

    /// Start tracking `path` if it is not tracked yet. Returns whether the
    /// file is tracked afterwards.
    fn add_missing_file(&mut self, path: &Path) -> bool;

    /// Bring `path` up to date with its backing storage.
    fn reload_file(&mut self, path: &Path) -> FileChange;

    /// Normalise a caller-supplied path to the key trees are stored under.
    fn resolve_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

#[derive(Debug)]
struct ProjectFile {
    tree: SyntaxTree,
    hash: u64,
    /// Read from disk (as opposed to supplied in memory).
    on_disk: bool,
}

impl ProjectFile {
    fn parse(path: &Path, text: String, on_disk: bool) -> Result<Self> {
        let hash = xxh3_64(text.as_bytes());
        let tree = SyntaxTree::parse(path, text)?;
        Ok(Self { tree, hash, on_disk })
    }
}

#[derive(Debug, Default)]
pub struct Project {
    root: PathBuf,
    max_file_bytes: u64,
    files: IndexMap<PathBuf, ProjectFile>,
}

fn read_source_lossy(abs_path: &Path) -> Result<Option<String>> {
    let bytes = std::fs::read(abs_path)
        .with_context(|| format!("Failed to read {}", abs_path.display()))?;
    // Binary detection: null bytes → not source.
    if bytes.contains(&0u8) {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

impl Project {
    /// Discover and parse every source file under `root`.
    pub fn load(root: &Path, cfg: &Config) -> Result<Self> {
        let max_file_bytes = cfg.effective_max_file_bytes();
        let entries = scan_workspace(&ScanOptions {
            repo_root: root.to_path_buf(),
            max_file_bytes,
            exclude_dir_names: cfg.scan.exclude_dir_names.clone(),
        })?;

        let parsed: Vec<(PathBuf, Result<Option<ProjectFile>>)> = entries
            .par_iter()
            .map(|entry| {
                let res = read_source_lossy(&entry.abs_path).and_then(|text| {
                    text.map(|t| ProjectFile::parse(&entry.abs_path, t, true))
                        .transpose()
                });
                (entry.abs_path.clone(), res)
            })
            .collect();

        let mut files = IndexMap::with_capacity(parsed.len());
        for (path, res) in parsed {
            match res {
                Ok(Some(file)) => {
                    files.insert(path, file);
                }
                Ok(None) => tracing::debug!("skipping binary file {}", path.display()),
                Err(e) => tracing::warn!("skipping {}: {e:#}", path.display()),
            }
        }
        tracing::debug!("loaded {} source files from {}", files.len(), root.display());

        Ok(Self {
            root: root.to_path_buf(),
            max_file_bytes,
            files,
        })
    }

    /// A project over in-memory buffers. Relative paths are kept as given.
    pub fn from_sources<I, P, S>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, S)>,
        P: Into<PathBuf>,
        S: Into<String>,
    {
        let mut project = Self {
            max_file_bytes: crate::config::ABSOLUTE_MAX_FILE_BYTES,
            ..Self::default()
        };
        for (path, text) in sources {
            project.set_source(path, text)?;
        }
        Ok(project)
    }

    /// Replace (or add) the contents of `path` with an in-memory buffer.
    pub fn set_source(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Result<()> {
        let path = self.resolve_path(&path.into());
        let file = ProjectFile::parse(&path, text.into(), false)?;
        self.files.insert(path, file);
        Ok(())
    }

    pub fn remove_file(&mut self, path: &Path) -> bool {
        let path = self.resolve_path(path);
        self.files.shift_remove(&path).is_some()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn read_from_disk(&self, path: &Path) -> Option<ProjectFile> {
        if !is_supported_path(path) {
            return None;
        }
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() || meta.len() > self.max_file_bytes {
            return None;
        }
        let text = match read_source_lossy(path) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("{e:#}");
                return None;
            }
        };
        ProjectFile::parse(path, text, true)
            .map_err(|e| tracing::warn!("{e:#}"))
            .ok()
    }
}

impl ClassLookup for Project {
    fn find_class(&self, name: &str, from: &Path) -> Option<(&SyntaxTree, NodeId)> {
        let local = self
            .files
            .get(from)
            .and_then(|f| find_class_in_tree(&f.tree, name).map(|id| (&f.tree, id)));
        local.or_else(|| {
            self.files
                .iter()
                .filter(|(path, _)| path.as_path() != from)
                .find_map(|(_, f)| find_class_in_tree(&f.tree, name).map(|id| (&f.tree, id)))
        })
    }
}

impl TreeProvider for Project {
    fn source_files(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    fn source_file(&self, path: &Path) -> Option<&SyntaxTree> {
        self.files.get(path).map(|f| &f.tree)
    }

    fn add_missing_file(&mut self, path: &Path) -> bool {
        let path = self.resolve_path(path);
        if self.files.contains_key(&path) {
            return true;
        }
        match self.read_from_disk(&path) {
            Some(file) => {
                tracing::debug!("tracking new file {}", path.display());
                self.files.insert(path, file);
                true
            }
            None => false,
        }
    }

    fn reload_file(&mut self, path: &Path) -> FileChange {
        let path = self.resolve_path(path);
        let Some((old_hash, on_disk)) = self.files.get(&path).map(|f| (f.hash, f.on_disk)) else {
            return if self.add_missing_file(&path) {
                FileChange::Added
            } else {
                FileChange::Missing
            };
        };

        // In-memory buffers are updated through `set_source`.
        if !on_disk {
            return FileChange::Unchanged;
        }

        match self.read_from_disk(&path) {
            None => {
                self.files.shift_remove(&path);
                FileChange::Removed
            }
            Some(file) if file.hash == old_hash => FileChange::Unchanged,
            Some(file) => {
                self.files.insert(path, file);
                FileChange::Updated
            }
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || self.root.as_os_str().is_empty() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
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
    fn load_parses_in_project_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/b.ts", "class B {}");
        write(dir.path(), "src/a.ts", "class A {}");
        write(dir.path(), "notes.txt", "class C {}");

        let project = Project::load(dir.path(), &Config::default()).unwrap();
        let names: Vec<String> = project
            .source_files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.ts", "b.ts"]);
    }

    #[test]
    fn reload_detects_changes_and_removal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.ts", "class A {}");
        let mut project = Project::load(dir.path(), &Config::default()).unwrap();
        let a = dir.path().join("a.ts");

        assert_eq!(project.reload_file(&a), FileChange::Unchanged);

        write(dir.path(), "a.ts", "class A2 {}");
        assert_eq!(project.reload_file(&a), FileChange::Updated);
        assert_eq!(project.source_file(&a).unwrap().source(), "class A2 {}");

        std::fs::remove_file(&a).unwrap();
        assert_eq!(project.reload_file(&a), FileChange::Removed);
        assert!(project.source_file(&a).is_none());
        assert_eq!(project.reload_file(&a), FileChange::Missing);

        write(dir.path(), "b.ts", "class B {}");
        assert_eq!(project.reload_file(Path::new("b.ts")), FileChange::Added);
        assert!(project.source_file(&dir.path().join("b.ts")).is_some());
    }

    #[test]
    fn find_class_prefers_the_asking_file() {
        let project = Project::from_sources([
            ("a.ts", "class Base { a() {} }"),
            ("b.ts", "class Base { b() {} }"),
        ])
        .unwrap();

        let (tree, _) = project.find_class("Base", Path::new("b.ts")).unwrap();
        assert_eq!(tree.path(), Path::new("b.ts"));
        let (tree, _) = project.find_class("Base", Path::new("c.ts")).unwrap();
        assert_eq!(tree.path(), Path::new("a.ts"));
        assert!(project.find_class("Missing", Path::new("a.ts")).is_none());
    }

    #[test]
    fn in_memory_sources_survive_reload() {
        let mut project = Project::from_sources([("x.ts", "const x = 1;")]).unwrap();
        assert_eq!(project.reload_file(Path::new("x.ts")), FileChange::Unchanged);
        project.set_source("x.ts", "const y = 2;").unwrap();
        assert_eq!(project.source_file(Path::new("x.ts")).unwrap().source(), "const y = 2;");
        assert!(project.remove_file(Path::new("x.ts")));
        assert!(project.is_empty());
    }
}
