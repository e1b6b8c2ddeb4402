//! Plugin registrations: the `{ "<namespace>": { "<kind>": ... } }` objects
//! found in plugin files.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};

use crate::navigation::{
    find_ancestor, find_descendants, location_for_span, reference_entry_for, unquoted_span, Location,
};
use crate::syntax::{NodeId, NodeKind, SyntaxTree, TextSpan};
use crate::target::{TargetConfig, TargetKind, CLASS_MEMBER_KINDS};

/// The node registered as an implementation: the key naming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    pub node: NodeId,
    pub span: TextSpan,
    pub location: Location,
}

impl Implementation {
    fn new(tree: &SyntaxTree, node: NodeId) -> Self {
        let span = tree.span(node);
        Self {
            node,
            span,
            location: location_for_span(tree, span),
        }
    }
}

/// `kind -> member name -> implementation`, with a single slot for `function`.
/// Member maps keep source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationMap {
    pub function: Option<Implementation>,
    pub member_function: IndexMap<String, Implementation>,
    pub member_property: IndexMap<String, Implementation>,
    pub static_member: IndexMap<String, Implementation>,
}

impl RegistrationMap {
    pub fn members(&self, kind: TargetKind) -> Option<&IndexMap<String, Implementation>> {
        match kind {
            TargetKind::Function => None,
            TargetKind::MemberFunction => Some(&self.member_function),
            TargetKind::MemberProperty => Some(&self.member_property),
            TargetKind::StaticMember => Some(&self.static_member),
        }
    }

    fn members_mut(&mut self, kind: TargetKind) -> Option<&mut IndexMap<String, Implementation>> {
        match kind {
            TargetKind::Function => None,
            TargetKind::MemberFunction => Some(&mut self.member_function),
            TargetKind::MemberProperty => Some(&mut self.member_property),
            TargetKind::StaticMember => Some(&mut self.static_member),
        }
    }

    /// Every registration as `(target, implementation)`, member kinds first.
    pub fn entries(&self) -> impl Iterator<Item = (TargetConfig, &Implementation)> + '_ {
        CLASS_MEMBER_KINDS
            .into_iter()
            .flat_map(move |kind| {
                self.members(kind)
                    .into_iter()
                    .flatten()
                    .map(move |(name, imp)| (TargetConfig::new(kind, name.clone()), imp))
            })
            .chain(self.function.iter().map(|imp| (TargetConfig::function(), imp)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceReference {
    file: PathBuf,
    node: NodeId,
    namespace: String,
    namespace_node: NodeId,
    namespace_span: TextSpan,
    namespace_location: Location,
    registrations: RegistrationMap,
}

fn is_pair(tree: &SyntaxTree, id: NodeId) -> bool {
    tree.kind(id) == NodeKind::PropertyAssignment
}

/// First string-or-identifier directly under a property assignment.
fn pair_key(tree: &SyntaxTree, pair: NodeId) -> Option<NodeId> {
    tree.children(pair)
        .iter()
        .copied()
        .find(|&c| tree.kind(c).is_string_or_identifier())
}

/// Registrations declared under a namespace pair, or `None` when the pair does
/// not have the registration shape.
fn registrations_under(tree: &SyntaxTree, ns_pair: NodeId) -> Option<RegistrationMap> {
    let mut map = RegistrationMap::default();

    // pair -> object -> pair
    let kind_pairs = find_descendants(
        tree,
        ns_pair,
        |kind_pair| {
            if !is_pair(tree, kind_pair) {
                return false;
            }
            let Some(key) = pair_key(tree, kind_pair) else {
                return false;
            };
            match TargetKind::from_tag(tree.unquoted_text(key)) {
                Some(TargetKind::Function) => {
                    map.function = Some(Implementation::new(tree, key));
                    true
                }
                Some(kind) => {
                    let member_pairs = find_descendants(
                        tree,
                        kind_pair,
                        |member_pair| {
                            if !is_pair(tree, member_pair) {
                                return false;
                            }
                            let Some(member) = pair_key(tree, member_pair) else {
                                return false;
                            };
                            if let Some(members) = map.members_mut(kind) {
                                members.insert(
                                    tree.unquoted_text(member).to_string(),
                                    Implementation::new(tree, member),
                                );
                            }
                            true
                        },
                        Some(2),
                        false,
                    );
                    !member_pairs.is_empty()
                }
                None => false,
            }
        },
        Some(2),
        false,
    );

    (!kind_pairs.is_empty()).then_some(map)
}

impl NamespaceReference {
    /// Build a reference whose owning node is exactly `pair`.
    pub fn from_pair(tree: &SyntaxTree, pair: NodeId) -> Option<Self> {
        if !is_pair(tree, pair) {
            return None;
        }
        let registrations = registrations_under(tree, pair)?;
        let namespace_node = pair_key(tree, pair)?;
        let namespace_location = reference_entry_for(tree, namespace_node, Some(&unquoted_span))?;
        let namespace_span = namespace_location.span;
        Some(Self {
            file: tree.path().to_path_buf(),
            node: pair,
            namespace: tree.unquoted_text(namespace_node).to_string(),
            namespace_node,
            namespace_span,
            namespace_location,
            registrations,
        })
    }

    /// Walk up from `node` to the outermost property assignment with the
    /// registration shape. A member value may itself look like a registration
    /// (`settings: { function: 1 }`); the enclosing namespace pair still owns
    /// it. Candidates that fail the shape leave nothing behind.
    pub fn construct_from_node(tree: &SyntaxTree, node: NodeId) -> Option<Self> {
        let mut owner = None;
        find_ancestor(
            tree,
            node,
            |pair| {
                if let Some(reference) = Self::from_pair(tree, pair) {
                    owner = Some(reference);
                }
                false
            },
            true,
        );
        owner
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The namespace property assignment.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The key naming the namespace.
    pub fn namespace_node(&self) -> NodeId {
        self.namespace_node
    }

    /// Span of the namespace text, quotes excluded.
    pub fn namespace_span(&self) -> TextSpan {
        self.namespace_span
    }

    pub fn namespace_location(&self) -> &Location {
        &self.namespace_location
    }

    pub fn registrations(&self) -> &RegistrationMap {
        &self.registrations
    }

    pub fn impl_by_target_config(&self, config: &TargetConfig) -> Option<&Implementation> {
        match config.kind {
            TargetKind::Function => self.registrations.function.as_ref(),
            kind => self.registrations.members(kind)?.get(&config.name),
        }
    }

    /// Which registration `node` was stored under.
    pub fn target_config_for_node(&self, node: NodeId) -> Option<TargetConfig> {
        self.registrations
            .entries()
            .find(|(_, imp)| imp.node == node)
            .map(|(config, _)| config)
    }
}
