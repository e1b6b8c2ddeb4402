//! Namespace cross-reference index.
//!
//! Maps each namespace to its declaration and to every plugin registration
//! for it. The index is filled lazily by one full scan on first use and kept
//! current file by file afterwards: re-scanning a file first retracts what
//! that file contributed last time, then extracts again.
//!
//! References are owned per file. The namespace → references map is derived
//! from those per-file lists and recomputed after every scan.

use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::declaration::{ClassLookup, NamespaceDeclaration};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::navigation::{find_ancestor, find_descendants, Location};
use crate::project::{FileChange, TreeProvider};
use crate::reference::NamespaceReference;
use crate::syntax::{NodeId, NodeKind, SyntaxTree};
use crate::target::{TargetConfig, TargetKind, CLASS_MEMBER_KINDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No full scan has happened yet.
    Empty,
    Populated,
}

/// What one file produced on its last scan. A file contributes either
/// declarations or references, never both.
#[derive(Debug, Clone)]
enum FileContribution {
    /// Namespaces declared by this file.
    Declarations(Vec<String>),
    References(Vec<NamespaceReference>),
}

/// Position of a reference inside `contributions`.
#[derive(Debug, Clone, Copy)]
struct ReferenceSlot {
    file: usize,
    item: usize,
}

pub struct NamespaceIndex<P: TreeProvider> {
    provider: P,
    keyword: String,
    plugin_marker: String,
    state: IndexState,
    declarations: HashMap<String, NamespaceDeclaration>,
    contributions: IndexMap<PathBuf, FileContribution>,
    reference_map: HashMap<String, Vec<ReferenceSlot>>,
}

impl<P: TreeProvider> NamespaceIndex<P> {
    pub fn new(provider: P, cfg: &Config) -> Self {
        Self {
            provider,
            keyword: cfg.annotation_keyword.clone(),
            plugin_marker: cfg.plugin_file_marker.clone(),
            state: IndexState::Empty,
            declarations: HashMap::new(),
            contributions: IndexMap::new(),
            reference_map: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Direct access to the provider. Call [`Self::notify_file_changed`] for
    /// every file changed through it.
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Only the file name is matched; directories named like plugins don't count.
    pub fn is_plugin_file(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().contains(self.plugin_marker.as_str()))
    }

    /// Scan every source file once, in project order. Does nothing after the
    /// first successful call. An empty project leaves the index `Empty`.
    pub fn ensure_full_scan(&mut self) {
        if self.state == IndexState::Populated {
            return;
        }

        let files = self.provider.source_files();
        if !files.is_empty() {
            self.state = IndexState::Populated;
        }
        for path in &files {
            self.scan_file(path);
        }
        self.rebuild_reference_map();

        tracing::debug!(
            "full scan: {} files, {} declarations, {} referenced namespaces",
            files.len(),
            self.declarations.len(),
            self.reference_map.len()
        );
    }

    pub fn lookup_declaration(&mut self, namespace: &str) -> Option<&NamespaceDeclaration> {
        self.ensure_full_scan();
        self.declarations.get(namespace)
    }

    pub fn lookup_references(&mut self, namespace: &str) -> Vec<&NamespaceReference> {
        self.ensure_full_scan();
        self.references_for(namespace)
    }

    /// Every declared namespace, sorted.
    pub fn namespaces(&mut self) -> Vec<String> {
        self.ensure_full_scan();
        let mut out: Vec<String> = self.declarations.keys().cloned().collect();
        out.sort();
        out
    }

    /// Files that contributed plugin registrations, in project order.
    pub fn plugin_files(&mut self) -> Vec<PathBuf> {
        self.ensure_full_scan();
        self.contributions
            .iter()
            .filter(|(_, c)| matches!(c, FileContribution::References(_)))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Warnings for the registrations `path` makes. Declarations never
    /// produce diagnostics.
    pub fn diagnostics_for_file(&mut self, path: &Path) -> Vec<Diagnostic> {
        self.ensure_full_scan();
        let path = self.provider.resolve_path(path);
        if !self.contributions.contains_key(&path) && self.provider.add_missing_file(&path) {
            self.scan_file(&path);
            self.rebuild_reference_map();
        }

        let Some(FileContribution::References(refs)) = self.contributions.get(&path) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for reference in refs {
            let Some(declaration) = self.declarations.get(reference.namespace()) else {
                out.push(Diagnostic::warning(
                    DiagnosticKind::NamespaceNotDeclared,
                    reference.namespace_location().clone(),
                ));
                continue;
            };

            let registrations = reference.registrations();
            if registrations.function.is_some() {
                continue;
            }

            for kind in CLASS_MEMBER_KINDS {
                for (name, implementation) in registrations.members(kind).into_iter().flatten() {
                    let config = TargetConfig::new(kind, name.clone());
                    if declaration.node_by_target_config(&config).is_none() {
                        out.push(Diagnostic::warning(
                            DiagnosticKind::MemberNotDeclared,
                            implementation.location.clone(),
                        ));
                    }
                }
            }
        }
        out
    }

    /// Diagnostics for every plugin file in the project.
    pub fn all_diagnostics(&mut self) -> Vec<Diagnostic> {
        let files = self.plugin_files();
        files.iter().flat_map(|p| self.diagnostics_for_file(p)).collect()
    }

    /// Re-read `path` from the provider and re-scan it. Declarations whose
    /// ancestor chain was read from `path` are re-scanned too. Returns every
    /// file that was re-scanned or dropped.
    pub fn notify_file_changed(&mut self, path: &Path) -> Vec<PathBuf> {
        let path = self.provider.resolve_path(path);
        let change = self.provider.reload_file(&path);
        tracing::debug!("{}: {change:?}", path.display());

        match change {
            FileChange::Removed | FileChange::Missing => {
                self.retract(&path);
                self.contributions.shift_remove(&path);
            }
            FileChange::Unchanged | FileChange::Updated | FileChange::Added => self.scan_file(&path),
        }

        let dependents: BTreeSet<PathBuf> = self
            .declarations
            .values()
            .filter(|d| d.depends_on(&path))
            .map(|d| d.file().to_path_buf())
            .collect();
        for dependent in &dependents {
            tracing::debug!("re-scanning {} (extends {})", dependent.display(), path.display());
            self.scan_file(dependent);
        }

        self.rebuild_reference_map();

        std::iter::once(path).chain(dependents).collect()
    }

    /// Where each registration for `(kind, member)` of `namespace` lives.
    pub fn resolve_implementation_for_member(
        &mut self,
        namespace: &str,
        kind: TargetKind,
        member: &str,
    ) -> Vec<Location> {
        let config = TargetConfig::new(kind, member);
        self.lookup_references(namespace)
            .into_iter()
            .filter_map(|r| r.impl_by_target_config(&config))
            .map(|imp| imp.location.clone())
            .collect()
    }

    /// The declared member a registration at `node` of `path` implements. On the
    /// namespace key itself, the declaration's namespace.
    pub fn resolve_declared_member_for_implementation(
        &mut self,
        path: &Path,
        node: NodeId,
    ) -> Option<Location> {
        self.ensure_full_scan();
        let path = self.provider.resolve_path(path);
        if !self.provider.add_missing_file(&path) {
            return None;
        }
        let tree = self.provider.source_file(&path)?;
        if node.index() >= tree.len() {
            return None;
        }

        // A cursor inside a quoted key lands on the string's fragment.
        let key = find_ancestor(tree, node, |id| tree.kind(id).is_string_or_identifier(), true)
            .unwrap_or(node);
        let reference = NamespaceReference::construct_from_node(tree, key)?;
        let declaration = self.declarations.get(reference.namespace())?;

        match reference.target_config_for_node(key) {
            Some(config) => declaration
                .node_by_target_config(&config)
                .map(|n| n.location.clone().as_definition()),
            None if key == reference.namespace_node() => Some(declaration.location().clone()),
            None => None,
        }
    }

    fn references_for(&self, namespace: &str) -> Vec<&NamespaceReference> {
        let Some(slots) = self.reference_map.get(namespace) else {
            return Vec::new();
        };
        slots
            .iter()
            .filter_map(|slot| match self.contributions.get_index(slot.file) {
                Some((_, FileContribution::References(refs))) => refs.get(slot.item),
                _ => None,
            })
            .collect()
    }

    fn rebuild_reference_map(&mut self) {
        self.reference_map.clear();
        for (file, (_, contribution)) in self.contributions.iter().enumerate() {
            let FileContribution::References(refs) = contribution else {
                continue;
            };
            for (item, reference) in refs.iter().enumerate() {
                self.reference_map
                    .entry(reference.namespace().to_string())
                    .or_default()
                    .push(ReferenceSlot { file, item });
            }
        }
    }

    /// Drop the declarations `path` contributed last time. References need no
    /// work here: they live in the contribution itself.
    fn retract(&mut self, path: &Path) {
        if let Some(FileContribution::Declarations(namespaces)) = self.contributions.get(path) {
            for namespace in namespaces {
                tracing::debug!("retracting {namespace} from {}", path.display());
                self.declarations.remove(namespace);
            }
        }
    }

    /// Retract then re-extract one file. The reference map must be rebuilt
    /// afterwards.
    fn scan_file(&mut self, path: &Path) {
        self.retract(path);

        let Some(tree) = self.provider.source_file(path) else {
            self.contributions.shift_remove(path);
            return;
        };

        if self.is_plugin_file(path) {
            let refs = extract_references(tree);
            tracing::debug!("{}: {} plugin registrations", path.display(), refs.len());
            self.contributions
                .insert(path.to_path_buf(), FileContribution::References(refs));
            return;
        }

        let found = extract_declarations(tree, &self.keyword, &self.provider);
        let mut namespaces = Vec::with_capacity(found.len());
        for declaration in found {
            let namespace = declaration.namespace().to_string();
            if let Some(previous) = self.declarations.get(&namespace) {
                if previous.file() != declaration.file() {
                    tracing::warn!(
                        "namespace {namespace} declared in {} replaces the one in {}",
                        declaration.file().display(),
                        previous.file().display()
                    );
                }
            }
            self.declarations.insert(namespace.clone(), declaration);
            namespaces.push(namespace);
        }
        self.contributions
            .insert(path.to_path_buf(), FileContribution::Declarations(namespaces));
    }
}

fn extract_declarations(
    tree: &SyntaxTree,
    keyword: &str,
    provider: &dyn ClassLookup,
) -> Vec<NamespaceDeclaration> {
    let tags = find_descendants(
        tree,
        tree.root(),
        |id| tree.kind(id) == NodeKind::AnnotationTag && tree.tag_name(id) == Some(keyword),
        None,
        true,
    );

    tags.into_iter()
        .filter_map(|tag| NamespaceDeclaration::construct_from_node(tree, tag, keyword, provider))
        .filter(|d| {
            if d.namespace().is_empty() {
                tracing::debug!(
                    "{}:{}: @{keyword} without a namespace",
                    tree.path().display(),
                    d.location().line
                );
            }
            !d.namespace().is_empty()
        })
        .collect()
}

fn extract_references(tree: &SyntaxTree) -> Vec<NamespaceReference> {
    let mut refs = Vec::new();
    find_descendants(
        tree,
        tree.root(),
        |id| match NamespaceReference::from_pair(tree, id) {
            Some(reference) => {
                if !reference.namespace().is_empty() {
                    refs.push(reference);
                }
                true
            }
            None => false,
        },
        None,
        true,
    );
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::find_node_at_position;
    use crate::project::Project;

    const DECLARATIONS: &str = r#"/**
 * @namespace Hello/World
 */
export class Abc {
    static method3() {}
    method3 = () => {};
    a = () => {};
    method() {}
}

/** @namespace Test */
export const test = () => {};
"#;

    const PLUGIN: &str = r#"export default {
    'Hello/World': {
        'member-function': {
            method: () => {},
            method3: () => {},
            b: () => {},
        },
    },
    'Wrong/Namespace': {
        function: () => {},
    },
    Test: {
        function: () => {},
    },
};
"#;

    fn index() -> NamespaceIndex<Project> {
        let project = Project::from_sources([("src/index.ts", DECLARATIONS), ("src/my.plugin.ts", PLUGIN)]).unwrap();
        NamespaceIndex::new(project, &Config::default())
    }

    #[test]
    fn lookups_trigger_the_full_scan() {
        let mut idx = index();
        assert_eq!(idx.state(), IndexState::Empty);
        let decl = idx.lookup_declaration("Hello/World").unwrap();
        assert_eq!(decl.namespace(), "Hello/World");
        assert_eq!(idx.state(), IndexState::Populated);
        assert_eq!(idx.lookup_references("Hello/World").len(), 1);
        assert_eq!(idx.lookup_references("Nope").len(), 0);
        assert_eq!(idx.namespaces(), vec!["Hello/World", "Test"]);
    }

    #[test]
    fn empty_project_stays_empty() {
        let mut idx = NamespaceIndex::new(Project::default(), &Config::default());
        assert!(idx.lookup_declaration("X").is_none());
        assert_eq!(idx.state(), IndexState::Empty);
    }

    #[test]
    fn diagnostics_for_plugin_file() {
        let mut idx = index();
        let diags = idx.diagnostics_for_file(Path::new("src/my.plugin.ts"));
        let kinds: Vec<DiagnosticKind> = diags.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::MemberNotDeclared, DiagnosticKind::NamespaceNotDeclared]
        );

        let member = &diags[0];
        assert_eq!(&PLUGIN[member.span.start..member.span.end()], "b");
        let missing = &diags[1];
        assert_eq!(&PLUGIN[missing.span.start..missing.span.end()], "Wrong/Namespace");

        assert!(idx.diagnostics_for_file(Path::new("src/index.ts")).is_empty());
    }

    #[test]
    fn rescan_is_idempotent_and_retracts() {
        let mut idx = index();
        idx.ensure_full_scan();
        let plugin = Path::new("src/my.plugin.ts");
        idx.notify_file_changed(plugin);
        idx.notify_file_changed(plugin);
        assert_eq!(idx.lookup_references("Hello/World").len(), 1);

        idx.provider_mut()
            .set_source("src/index.ts", "export class Abc {}\n")
            .unwrap();
        idx.notify_file_changed(Path::new("src/index.ts"));
        assert!(idx.lookup_declaration("Hello/World").is_none());
        assert!(idx.lookup_declaration("Test").is_none());
    }

    #[test]
    fn removed_plugin_file_drops_its_references() {
        let mut idx = index();
        idx.ensure_full_scan();
        idx.provider_mut().remove_file(Path::new("src/my.plugin.ts"));
        idx.notify_file_changed(Path::new("src/my.plugin.ts"));
        assert!(idx.lookup_references("Hello/World").is_empty());
        assert!(idx.plugin_files().is_empty());
    }

    #[test]
    fn implementations_and_declared_members_resolve_both_ways() {
        let mut idx = index();
        let impls = idx.resolve_implementation_for_member("Hello/World", TargetKind::MemberFunction, "method3");
        assert_eq!(impls.len(), 1);
        assert_eq!(impls[0].line, 5);

        let plugin = Path::new("src/my.plugin.ts");
        let tree = idx.provider().source_file(plugin).unwrap();
        let offset = PLUGIN.find("method3").unwrap();
        let node = find_node_at_position(tree, offset).unwrap();

        let declared = idx.resolve_declared_member_for_implementation(plugin, node).unwrap();
        assert_eq!(declared.file, PathBuf::from("src/index.ts"));
        // the instance arrow property, not the static method
        assert_eq!(declared.line, 6);
        assert!(declared.is_definition);

        let tree = idx.provider().source_file(plugin).unwrap();
        let ns = find_node_at_position(tree, PLUGIN.find("Test").unwrap()).unwrap();
        let declared = idx.resolve_declared_member_for_implementation(plugin, ns).unwrap();
        assert_eq!(declared.line, 11);
    }

    #[test]
    fn superclass_edits_rescan_dependents() {
        let project = Project::from_sources([
            ("base.ts", "export class Base { inherited() {} }\n"),
            ("child.ts", "/** @namespace Child */\nclass Child extends Base {}\n"),
            ("child.plugin.ts", "export default { Child: { 'member-function': { inherited: () => {} } } };\n"),
        ])
        .unwrap();
        let mut idx = NamespaceIndex::new(project, &Config::default());
        assert!(idx.diagnostics_for_file(Path::new("child.plugin.ts")).is_empty());

        idx.provider_mut()
            .set_source("base.ts", "export class Base { renamed() {} }\n")
            .unwrap();
        let rescanned = idx.notify_file_changed(Path::new("base.ts"));
        assert_eq!(rescanned, vec![PathBuf::from("base.ts"), PathBuf::from("child.ts")]);

        let diags = idx.diagnostics_for_file(Path::new("child.plugin.ts"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::MemberNotDeclared);
    }

    #[test]
    fn duplicate_namespace_last_scan_wins() {
        let project = Project::from_sources([
            ("a.ts", "/** @namespace Dup */\nfunction a() {}\n"),
            ("b.ts", "/** @namespace Dup */\nfunction b() {}\n"),
        ])
        .unwrap();
        let mut idx = NamespaceIndex::new(project, &Config::default());
        assert_eq!(idx.lookup_declaration("Dup").unwrap().file(), Path::new("b.ts"));
    }

    #[test]
    fn empty_namespaces_are_never_indexed() {
        let project = Project::from_sources([
            ("a.ts", "/** @namespace */\nclass A {}\n"),
            ("a.plugin.ts", "export default {\n  '': { function: () => {} },\n};\n"),
        ])
        .unwrap();
        let mut idx = NamespaceIndex::new(project, &Config::default());

        assert!(idx.lookup_declaration("").is_none());
        assert!(idx.namespaces().is_empty());
        assert!(idx.lookup_references("").is_empty());
        assert!(idx.diagnostics_for_file(Path::new("a.plugin.ts")).is_empty());
        assert_eq!(idx.plugin_files(), vec![PathBuf::from("a.plugin.ts")]);
    }

    #[test]
    fn plugin_marker_in_a_directory_name_does_not_count() {
        let project = Project::from_sources([
            ("shop.plugins/cart.ts", "/** @namespace Shop/Cart */\nclass Cart { add() {} }\n"),
            (
                "shop.plugins/cart.plugin.ts",
                "export default { 'Shop/Cart': { 'member-function': { add: () => {} } } };\n",
            ),
        ])
        .unwrap();
        let mut idx = NamespaceIndex::new(project, &Config::default());

        assert!(idx.lookup_declaration("Shop/Cart").is_some());
        assert_eq!(idx.plugin_files(), vec![PathBuf::from("shop.plugins/cart.plugin.ts")]);
        assert!(idx.all_diagnostics().is_empty());
    }
}
