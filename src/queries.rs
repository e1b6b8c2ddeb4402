//! Editor-style queries at a byte offset, on top of [`NamespaceIndex`].

use serde::Serialize;
use std::path::Path;

use crate::declaration::NamespaceDeclaration;
use crate::index::NamespaceIndex;
use crate::navigation::{find_node_at_position, Location};
use crate::project::TreeProvider;
use crate::syntax::{NodeId, NodeKind};
use crate::target::TargetConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickInfo {
    pub namespace: String,
    pub location: Location,
}

/// What sits under the cursor in a declaring file.
enum DeclarationSite {
    Annotation(String),
    Member(String, TargetConfig),
}

impl<P: TreeProvider> NamespaceIndex<P> {
    fn node_at(&mut self, path: &Path, offset: usize) -> Option<NodeId> {
        let path = self.provider().resolve_path(path);
        if !self.provider_mut().add_missing_file(&path) {
            return None;
        }
        let tree = self.provider().source_file(&path)?;
        find_node_at_position(tree, offset)
    }

    fn declaration_site(&mut self, path: &Path, offset: usize) -> Option<DeclarationSite> {
        let node = self.node_at(path, offset)?;
        let path = self.provider().resolve_path(path);
        let tree = self.provider().source_file(&path)?;
        let keyword = self.keyword();

        let declaration = NamespaceDeclaration::construct_from_node(tree, node, keyword, self.provider())?;
        if declaration.namespace().is_empty() {
            return None;
        }

        let on_tag = tree.kind(node) == NodeKind::AnnotationTag && tree.tag_name(node) == Some(keyword);
        if on_tag {
            return Some(DeclarationSite::Annotation(declaration.namespace().to_string()));
        }
        let config = declaration.target_config_for_node(tree, node)?;
        Some(DeclarationSite::Member(declaration.namespace().to_string(), config))
    }

    /// Namespace under the cursor when it rests on an annotation.
    pub fn quick_info(&mut self, path: &Path, offset: usize) -> Option<QuickInfo> {
        let node = self.node_at(path, offset)?;
        let path = self.provider().resolve_path(path);
        let tree = self.provider().source_file(&path)?;
        let keyword = self.keyword();
        if tree.kind(node) != NodeKind::AnnotationTag || tree.tag_name(node) != Some(keyword) {
            return None;
        }

        let declaration = NamespaceDeclaration::construct_from_node(tree, node, keyword, self.provider())?;
        if declaration.namespace().is_empty() {
            return None;
        }
        Some(QuickInfo {
            namespace: declaration.namespace().to_string(),
            location: declaration.location().clone(),
        })
    }

    /// On an annotation: the namespace key of every registration for it. On a
    /// declared member or function: every registered implementation.
    pub fn find_references(&mut self, path: &Path, offset: usize) -> Vec<Location> {
        let resolved = self.provider().resolve_path(path);
        if self.is_plugin_file(&resolved) {
            return Vec::new();
        }

        match self.declaration_site(path, offset) {
            Some(DeclarationSite::Annotation(namespace)) => self
                .lookup_references(&namespace)
                .into_iter()
                .map(|r| r.namespace_location().clone())
                .collect(),
            Some(DeclarationSite::Member(namespace, config)) => {
                self.resolve_implementation_for_member(&namespace, config.kind, &config.name)
            }
            None => Vec::new(),
        }
    }

    /// From a plugin registration to what it registers against.
    pub fn goto_definition(&mut self, path: &Path, offset: usize) -> Option<Location> {
        let resolved = self.provider().resolve_path(path);
        if !self.is_plugin_file(&resolved) {
            return None;
        }
        let node = self.node_at(path, offset)?;
        self.resolve_declared_member_for_implementation(path, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::project::Project;

    const DECL: &str = "/** @namespace Shop/Cart */\nexport class Cart {\n  total = 0;\n  add() {}\n}\n";
    const PLUGIN: &str = "export default {\n  'Shop/Cart': {\n    'member-function': { add: () => {} },\n    'member-property': { total: 1 },\n  },\n};\n";

    fn index() -> NamespaceIndex<Project> {
        let project = Project::from_sources([("cart.ts", DECL), ("cart.plugin.ts", PLUGIN)]).unwrap();
        NamespaceIndex::new(project, &Config::default())
    }

    #[test]
    fn quick_info_on_annotation_only() {
        let mut idx = index();
        let info = idx.quick_info(Path::new("cart.ts"), DECL.find("Shop").unwrap()).unwrap();
        assert_eq!(info.namespace, "Shop/Cart");
        assert_eq!(info.location.span.start, DECL.find("Shop/Cart").unwrap());

        assert!(idx.quick_info(Path::new("cart.ts"), DECL.find("add").unwrap()).is_none());
        assert!(idx.quick_info(Path::new("missing.ts"), 0).is_none());
    }

    #[test]
    fn references_from_annotation_and_member() {
        let mut idx = index();
        let refs = idx.find_references(Path::new("cart.ts"), DECL.find("@namespace").unwrap());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].file, Path::new("cart.plugin.ts"));
        assert_eq!(refs[0].line, 2);

        let refs = idx.find_references(Path::new("cart.ts"), DECL.find("add").unwrap());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].line, 3);

        let refs = idx.find_references(Path::new("cart.ts"), DECL.find("total").unwrap());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].line, 4);
    }

    #[test]
    fn definition_from_registration() {
        let mut idx = index();
        let def = idx
            .goto_definition(Path::new("cart.plugin.ts"), PLUGIN.find("total").unwrap())
            .unwrap();
        assert_eq!(def.file, Path::new("cart.ts"));
        assert_eq!(def.line, 3);

        // inside the quoted namespace key
        let def = idx
            .goto_definition(Path::new("cart.plugin.ts"), PLUGIN.find("Cart'").unwrap())
            .unwrap();
        assert_eq!(def.span.start, DECL.find("Shop/Cart").unwrap());

        assert!(idx.goto_definition(Path::new("cart.ts"), 0).is_none());
    }

    #[test]
    fn definition_for_member_whose_value_looks_like_a_registration() {
        let decl = "/** @namespace Shop/Cart */\nclass Cart {\n  settings = {};\n}\n";
        let plugin = "export default {\n  'Shop/Cart': {\n    'member-property': { settings: { function: 1 } },\n  },\n};\n";
        let project = Project::from_sources([("cart.ts", decl), ("cart.plugin.ts", plugin)]).unwrap();
        let mut idx = NamespaceIndex::new(project, &Config::default());

        assert_eq!(idx.lookup_references("Shop/Cart").len(), 1);
        assert!(idx.diagnostics_for_file(Path::new("cart.plugin.ts")).is_empty());

        let def = idx
            .goto_definition(Path::new("cart.plugin.ts"), plugin.find("settings").unwrap())
            .unwrap();
        assert_eq!(def.file, Path::new("cart.ts"));
        assert_eq!(def.line, 3);
    }
}
