//! Predicate-driven search over a [`SyntaxTree`]. Knows nothing about
//! annotations or plugin objects.

use serde::Serialize;
use std::path::PathBuf;

use crate::syntax::{NodeId, SyntaxTree, TextSpan};

/// A navigable location: one span in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub span: TextSpan,
    /// 1-based line / column of `span.start`.
    pub line: usize,
    pub column: usize,
    pub is_write_access: bool,
    pub is_definition: bool,
}

impl Location {
    pub fn as_definition(mut self) -> Self {
        self.is_definition = true;
        self
    }
}

/// Nearest node on the path to the root (starting at `node` itself when
/// `include_self`) that satisfies `pred`.
pub fn find_ancestor(
    tree: &SyntaxTree,
    node: NodeId,
    mut pred: impl FnMut(NodeId) -> bool,
    include_self: bool,
) -> Option<NodeId> {
    let mut cur = if include_self { Some(node) } else { tree.parent(node) };
    while let Some(id) = cur {
        if pred(id) {
            return Some(id);
        }
        cur = tree.parent(id);
    }
    None
}

/// Depth-first, pre-order search below `node`. A matching node is collected and
/// its subtree is not searched further. Depth counts edges from `node`; nodes
/// deeper than `max_depth` are never visited. With `check_root_first == false`
/// the root itself is never a match, only its descendants.
pub fn find_descendants(
    tree: &SyntaxTree,
    node: NodeId,
    mut pred: impl FnMut(NodeId) -> bool,
    max_depth: Option<usize>,
    check_root_first: bool,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    let max_depth = max_depth.unwrap_or(usize::MAX);
    // Explicit stack keeps deep trees off the call stack; children are pushed in
    // reverse so they pop in source order.
    let mut stack = vec![(node, 0usize, check_root_first)];
    while let Some((id, depth, check)) = stack.pop() {
        if depth > max_depth {
            continue;
        }
        if check && pred(id) {
            out.push(id);
            continue;
        }
        if depth == max_depth {
            continue;
        }
        for &child in tree.children(id).iter().rev() {
            stack.push((child, depth + 1, true));
        }
    }
    out
}

/// Deepest node whose span (including attached doc comments) contains `offset`.
pub fn find_node_at_position(tree: &SyntaxTree, offset: usize) -> Option<NodeId> {
    let covers = |id: NodeId| {
        let n = tree.node(id);
        offset >= n.full_start && offset < n.span.end()
    };

    let root = tree.root();
    if tree.is_empty() || !covers(root) {
        return None;
    }

    let mut cur = root;
    while let Some(&child) = tree.children(cur).iter().find(|&&c| covers(c)) {
        cur = child;
    }
    Some(cur)
}

/// Build a location for `node`. `span_fn` overrides the node's own span, e.g.
/// to drop the quotes of a string literal.
pub fn reference_entry_for(
    tree: &SyntaxTree,
    node: NodeId,
    span_fn: Option<&dyn Fn(&SyntaxTree, NodeId) -> Option<TextSpan>>,
) -> Option<Location> {
    if node.index() >= tree.len() {
        return None;
    }
    let span = match span_fn {
        Some(f) => f(tree, node)?,
        None => tree.span(node),
    };
    Some(location_for_span(tree, span))
}

pub fn location_for_span(tree: &SyntaxTree, span: TextSpan) -> Location {
    let (line, column) = tree.line_col(span.start);
    Location {
        file: tree.path().to_path_buf(),
        span,
        line,
        column,
        is_write_access: true,
        is_definition: false,
    }
}

/// Span function for string literals: the contents without quotes.
pub fn unquoted_span(tree: &SyntaxTree, node: NodeId) -> Option<TextSpan> {
    Some(tree.unquoted_span(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::NodeKind;
    use std::path::Path;

    fn parse(src: &str) -> SyntaxTree {
        SyntaxTree::parse(Path::new("nav.ts"), src.to_string()).unwrap()
    }

    #[test]
    fn ancestor_walk_respects_include_self() {
        let tree = parse("const o = { a: { b: 1 } };\n");
        let b = find_descendants(&tree, tree.root(), |id| tree.text(id) == "b", None, true)[0];
        let pair = |id: NodeId| tree.kind(id) == NodeKind::PropertyAssignment;

        let inner = find_ancestor(&tree, b, pair, true).unwrap();
        assert_eq!(tree.text(inner), "b: 1");

        let outer = find_ancestor(&tree, inner, pair, false).unwrap();
        assert!(tree.text(outer).starts_with("a: {"));
        assert_eq!(find_ancestor(&tree, inner, pair, true), Some(inner));
        assert_eq!(find_ancestor(&tree, b, |_| false, true), None);
    }

    #[test]
    fn descendants_stop_at_first_match_per_branch() {
        let tree = parse("const o = { a: { b: { c: 1 } }, d: 2 };\n");
        let pairs = find_descendants(
            &tree,
            tree.root(),
            |id| tree.kind(id) == NodeKind::PropertyAssignment,
            None,
            true,
        );
        let keys: Vec<&str> = pairs
            .iter()
            .map(|&p| tree.text(tree.child_by_field(p, "key").unwrap()))
            .collect();
        assert_eq!(keys, vec!["a", "d"]);
    }

    #[test]
    fn descendants_bounded_by_depth() {
        let tree = parse("const o = { a: { b: 1 } };\n");
        let outer = find_descendants(
            &tree,
            tree.root(),
            |id| tree.kind(id) == NodeKind::PropertyAssignment,
            None,
            true,
        )[0];
        let is_pair = |id: NodeId| tree.kind(id) == NodeKind::PropertyAssignment;

        // pair -> object -> pair
        assert!(find_descendants(&tree, outer, is_pair, Some(1), false).is_empty());
        assert_eq!(find_descendants(&tree, outer, is_pair, Some(2), false).len(), 1);
        // root not excluded when checked first
        assert_eq!(find_descendants(&tree, outer, is_pair, Some(2), true), vec![outer]);
    }

    #[test]
    fn node_at_position_reaches_into_doc_tags() {
        let src = "/** @namespace A/B */\nclass C { m() {} }\n";
        let tree = parse(src);
        let at = find_node_at_position(&tree, src.find("A/B").unwrap()).unwrap();
        assert_eq!(tree.kind(at), NodeKind::AnnotationTag);

        let m = find_node_at_position(&tree, src.find("m()").unwrap()).unwrap();
        assert_eq!(tree.kind(m), NodeKind::Identifier);
        assert_eq!(tree.text(m), "m");

        assert_eq!(find_node_at_position(&tree, src.len() + 10), None);
    }

    #[test]
    fn reference_entry_uses_span_fn() {
        let src = "const o = { 'X/Y': 1 };\n";
        let tree = parse(src);
        let key = find_descendants(&tree, tree.root(), |id| tree.kind(id) == NodeKind::StringLiteral, None, true)[0];

        let raw = reference_entry_for(&tree, key, None).unwrap();
        assert_eq!(raw.span.length, 5);

        let loc = reference_entry_for(&tree, key, Some(&unquoted_span)).unwrap();
        assert_eq!(loc.span.start, src.find("X/Y").unwrap());
        assert_eq!(loc.span.length, 3);
        assert_eq!((loc.line, loc.column), (1, 14));
        assert!(loc.is_write_access);
        assert!(!loc.is_definition);
    }
}
