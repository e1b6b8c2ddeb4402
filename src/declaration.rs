//! `@namespace` extension points.
//!
//! A [`NamespaceDeclaration`] is built from one annotation tag and captures,
//! at construction time, everything later lookups need: the namespace string
//! and its span, and the shape of the annotated target. For a class that shape
//! is the ancestor chain (the class itself, then each superclass in turn) with
//! the members each class declares.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::navigation::{find_ancestor, find_descendants, location_for_span, Location};
use crate::syntax::{NodeId, NodeKind, SyntaxTree, TextSpan};
use crate::target::{TargetConfig, TargetKind};

fn namespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9/]+").expect("namespace regex is valid"))
}

/// Resolves a class by name for ancestor-chain walks.
pub trait ClassLookup {
    /// A class declaration named `name`, preferring the file `from`.
    fn find_class(&self, name: &str, from: &Path) -> Option<(&SyntaxTree, NodeId)>;
}

/// A single tree resolves only its own classes.
impl ClassLookup for SyntaxTree {
    fn find_class(&self, name: &str, _from: &Path) -> Option<(&SyntaxTree, NodeId)> {
        find_class_in_tree(self, name).map(|id| (self, id))
    }
}

pub fn find_class_in_tree(tree: &SyntaxTree, name: &str) -> Option<NodeId> {
    find_descendants(
        tree,
        tree.root(),
        |id| {
            tree.kind(id) == NodeKind::ClassDeclaration
                && tree.child_by_field(id, "name").map(|n| tree.text(n)) == Some(name)
        },
        None,
        true,
    )
    .into_iter()
    .next()
}

/// A named node found in a declaration's target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredNode {
    pub name: String,
    pub node: NodeId,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberShape {
    Method,
    Accessor,
    Property { function_valued: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassMember {
    /// The member's name identifier.
    pub node: DeclaredNode,
    /// The member declaration owning the name.
    pub decl: NodeId,
    pub shape: MemberShape,
    pub is_static: bool,
}

impl ClassMember {
    /// Whether a registration of `kind` may target this member.
    pub fn satisfies(&self, kind: TargetKind) -> bool {
        if self.is_static {
            return kind == TargetKind::StaticMember;
        }
        match kind {
            TargetKind::MemberFunction => matches!(
                self.shape,
                MemberShape::Method | MemberShape::Property { function_valued: true }
            ),
            TargetKind::MemberProperty => {
                matches!(self.shape, MemberShape::Property { .. } | MemberShape::Accessor)
            }
            TargetKind::StaticMember | TargetKind::Function => false,
        }
    }

    /// The kind a registration for this member is expected to use.
    pub fn target_kind(&self) -> TargetKind {
        if self.is_static {
            return TargetKind::StaticMember;
        }
        match self.shape {
            MemberShape::Method | MemberShape::Property { function_valued: true } => {
                TargetKind::MemberFunction
            }
            MemberShape::Property { function_valued: false } | MemberShape::Accessor => {
                TargetKind::MemberProperty
            }
        }
    }
}

/// One class of an ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassShape {
    pub name: String,
    pub file: PathBuf,
    pub node: NodeId,
    pub superclass: Option<String>,
    pub members: Vec<ClassMember>,
}

impl ClassShape {
    pub fn from_node(tree: &SyntaxTree, class: NodeId) -> Self {
        let name = tree
            .child_by_field(class, "name")
            .map(|n| tree.text(n).to_string())
            .unwrap_or_default();

        let superclass = tree
            .children(class)
            .iter()
            .copied()
            .find(|&c| tree.kind(c) == NodeKind::ClassHeritage)
            .and_then(|h| superclass_name(tree, h));

        let members = tree
            .child_by_field(class, "body")
            .map(|body| {
                tree.children(body)
                    .iter()
                    .filter_map(|&m| class_member(tree, m))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name,
            file: tree.path().to_path_buf(),
            node: class,
            superclass,
            members,
        }
    }
}

fn superclass_name(tree: &SyntaxTree, heritage: NodeId) -> Option<String> {
    let extends = tree
        .children(heritage)
        .iter()
        .copied()
        .find(|&c| tree.kind(c) == NodeKind::ExtendsClause);

    let value = match extends {
        Some(clause) => tree
            .child_by_field(clause, "value")
            .or_else(|| tree.children(clause).first().copied())?,
        // JS grammar: `class_heritage` holds the expression directly.
        None => tree
            .children(heritage)
            .iter()
            .copied()
            .find(|&c| tree.kind(c) != NodeKind::Other("implements_clause"))?,
    };

    match tree.kind(value) {
        NodeKind::Identifier => Some(tree.text(value).to_string()),
        NodeKind::Other("member_expression") => tree
            .child_by_field(value, "property")
            .map(|p| tree.text(p).to_string()),
        _ => None,
    }
}

fn class_member(tree: &SyntaxTree, decl: NodeId) -> Option<ClassMember> {
    let shape = match tree.kind(decl) {
        NodeKind::MethodDeclaration => MemberShape::Method,
        NodeKind::Accessor => MemberShape::Accessor,
        NodeKind::PropertyDeclaration => MemberShape::Property {
            function_valued: tree
                .child_by_field(decl, "value")
                .is_some_and(|v| tree.kind(v).is_function_value()),
        },
        _ => return None,
    };

    let name_node = tree.child_by_field(decl, "name")?;
    if !tree.kind(name_node).is_string_or_identifier() {
        return None;
    }

    Some(ClassMember {
        node: DeclaredNode {
            name: tree.unquoted_text(name_node).to_string(),
            node: name_node,
            location: location_for_span(tree, tree.span(name_node)),
        },
        decl,
        shape,
        is_static: tree.is_static(decl),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationTarget {
    /// Annotated function or variable.
    Function(DeclaredNode),
    /// Annotated class. `chain[0]` is the class itself.
    Class { chain: Vec<ClassShape> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDeclaration {
    file: PathBuf,
    tag: NodeId,
    namespace: String,
    span: TextSpan,
    location: Location,
    target: DeclarationTarget,
    depends_on: BTreeSet<PathBuf>,
}

impl NamespaceDeclaration {
    /// Walk up from `node` to the nearest declaration documented with
    /// `@<keyword>` and build the entity for it.
    ///
    /// Returns `None` when there is no such annotation or the annotated target
    /// is neither a class nor a function / variable. A tag with no extractable
    /// namespace still yields an entity, with an empty namespace.
    pub fn construct_from_node(
        tree: &SyntaxTree,
        node: NodeId,
        keyword: &str,
        classes: &dyn ClassLookup,
    ) -> Option<Self> {
        let is_keyword_tag = |tag: NodeId| tree.tag_name(tag) == Some(keyword);

        let host = find_ancestor(
            tree,
            node,
            |id| tree.doc_tags(id).iter().any(|&t| is_keyword_tag(t)),
            true,
        )?;

        let tags: Vec<NodeId> = tree
            .doc_tags(host)
            .iter()
            .copied()
            .filter(|&t| is_keyword_tag(t))
            .collect();
        // Prefer the tag the search started in.
        let tag = tags
            .iter()
            .copied()
            .find(|&t| find_ancestor(tree, node, |id| id == t, true).is_some())
            .or_else(|| tags.first().copied())?;

        let target = match tree.kind(host) {
            NodeKind::ClassDeclaration => DeclarationTarget::Class { chain: Vec::new() },
            NodeKind::FunctionDeclaration | NodeKind::VariableDeclaration => {
                let name_node = tree.child_by_field(host, "name");
                let span = name_node.map(|n| tree.span(n)).unwrap_or_else(|| tree.span(host));
                DeclarationTarget::Function(DeclaredNode {
                    name: name_node.map(|n| tree.text(n).to_string()).unwrap_or_default(),
                    node: host,
                    location: location_for_span(tree, span),
                })
            }
            _ => return None,
        };

        let (namespace, span) = parse_namespace(tree, tag, keyword);
        let mut decl = Self {
            file: tree.path().to_path_buf(),
            tag,
            namespace,
            span,
            location: location_for_span(tree, span).as_definition(),
            target,
            depends_on: BTreeSet::new(),
        };

        if let DeclarationTarget::Class { .. } = decl.target {
            let (chain, touched) = ancestor_chain(tree, host, classes);
            decl.target = DeclarationTarget::Class { chain };
            decl.depends_on = touched;
        }

        Some(decl)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The annotation tag this declaration was built from.
    pub fn tag(&self) -> NodeId {
        self.tag
    }

    /// Namespace string; empty when the annotation carried none.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn text_span(&self) -> TextSpan {
        self.span
    }

    /// Location of the namespace text inside the annotation.
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn target(&self) -> &DeclarationTarget {
        &self.target
    }

    pub fn is_function_like(&self) -> bool {
        matches!(self.target, DeclarationTarget::Function(_))
    }

    pub fn chain(&self) -> &[ClassShape] {
        match &self.target {
            DeclarationTarget::Class { chain } => chain,
            DeclarationTarget::Function(_) => &[],
        }
    }

    /// Whether this declaration's captured shape was read from `path` in
    /// addition to its own file.
    pub fn depends_on(&self, path: &Path) -> bool {
        path != self.file && self.depends_on.contains(path)
    }

    /// Kind and name of the declared member at `node` (its name identifier or
    /// its declaration). Only the annotated class itself is consulted, not its
    /// ancestors. Any node of a function target maps to the `function` kind.
    pub fn target_config_for_node(&self, tree: &SyntaxTree, node: NodeId) -> Option<TargetConfig> {
        if tree.path() != self.file {
            return None;
        }
        match &self.target {
            DeclarationTarget::Function(_) => Some(TargetConfig::function()),
            DeclarationTarget::Class { chain } => {
                let own = chain.first()?;
                own.members
                    .iter()
                    .find(|m| m.node.node == node || m.decl == node)
                    .map(|m| TargetConfig::new(m.target_kind(), m.node.name.clone()))
            }
        }
    }

    /// Every node satisfying `config`, across the whole ancestor chain.
    pub fn nodes_by_target_config(&self, config: &TargetConfig) -> Vec<&DeclaredNode> {
        match (&self.target, config.kind) {
            (DeclarationTarget::Function(node), TargetKind::Function) => vec![node],
            (DeclarationTarget::Function(_), _) | (DeclarationTarget::Class { .. }, TargetKind::Function) => {
                Vec::new()
            }
            (DeclarationTarget::Class { chain }, kind) => chain
                .iter()
                .flat_map(|class| class.members.iter())
                .filter(|m| m.node.name == config.name && m.satisfies(kind))
                .map(|m| &m.node)
                .collect(),
        }
    }

    pub fn node_by_target_config(&self, config: &TargetConfig) -> Option<&DeclaredNode> {
        self.nodes_by_target_config(config).into_iter().next()
    }
}

/// Namespace text and span for an annotation tag: drop `@<keyword>` and one
/// separator, trim, take the first run of `[A-Za-z0-9/]`.
fn parse_namespace(tree: &SyntaxTree, tag: NodeId, keyword: &str) -> (String, TextSpan) {
    let tag_span = tree.span(tag);
    let text = tree.text(tag);

    let mut rest = text.get(1 + keyword.len()..).unwrap_or("").chars();
    rest.next();
    let rest = rest.as_str().trim_start();
    let offset = text.len() - rest.len();

    match namespace_regex().find(rest.trim_end()) {
        Some(m) => (
            m.as_str().to_string(),
            TextSpan::new(tag_span.start + offset + m.start(), m.len()),
        ),
        None => (String::new(), TextSpan::new(tag_span.start + offset, 0)),
    }
}

/// The class at `class`, then each superclass in turn. A superclass is looked
/// up in the same file first, then through `classes`. Also returns every file
/// the walk read.
fn ancestor_chain(
    tree: &SyntaxTree,
    class: NodeId,
    classes: &dyn ClassLookup,
) -> (Vec<ClassShape>, BTreeSet<PathBuf>) {
    let own = ClassShape::from_node(tree, class);
    let mut seen: HashSet<(PathBuf, NodeId)> = HashSet::new();
    seen.insert((own.file.clone(), own.node));
    let mut touched = BTreeSet::from([own.file.clone()]);

    let mut next = own.superclass.clone();
    let mut from = own.file.clone();
    let mut chain = vec![own];

    while let Some(name) = next {
        let found = find_class_in_tree(tree, &name)
            .filter(|_| tree.path() == from)
            .map(|id| (tree, id))
            .or_else(|| classes.find_class(&name, &from));
        let Some((class_tree, id)) = found else {
            tracing::debug!("superclass {name} not found from {}", from.display());
            break;
        };
        if !seen.insert((class_tree.path().to_path_buf(), id)) {
            break;
        }

        let shape = ClassShape::from_node(class_tree, id);
        touched.insert(shape.file.clone());
        from = shape.file.clone();
        next = shape.superclass.clone();
        chain.push(shape);
    }

    (chain, touched)
}
