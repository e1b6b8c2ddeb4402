//! Owned syntax trees for TypeScript / JavaScript sources.
//!
//! Sources are parsed with tree-sitter and converted once into an arena of
//! [`SyntaxNode`]s. Every node carries a closed [`NodeKind`] so the rest of the
//! crate matches on variants instead of grammar strings. Only named grammar
//! nodes are kept; modifiers that matter (`static`, `get`/`set`) are folded into
//! node flags.
//!
//! `/** ... */` comments are attached to the declaration that follows them: the
//! comment becomes a [`NodeKind::DocComment`] child of that declaration and each
//! `@tag` inside it becomes a [`NodeKind::AnnotationTag`] child of the comment.
//! A tag's grandparent is therefore always the documented declaration.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tree_sitter::{Language, Node, Parser};

/// Byte range inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextSpan {
    pub start: usize,
    pub length: usize,
}

impl TextSpan {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    pub fn from_bounds(start: usize, end: usize) -> Self {
        Self {
            start,
            length: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end()
    }

    pub fn covers(&self, other: &TextSpan) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

/// Index of a node inside its [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Node categories the indexer cares about. Everything else is `Other`,
/// carrying the grammar kind for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    SourceFile,
    Comment,
    DocComment,
    AnnotationTag,
    ClassDeclaration,
    ClassHeritage,
    ExtendsClause,
    ClassBody,
    FunctionDeclaration,
    VariableDeclaration,
    MethodDeclaration,
    Accessor,
    PropertyDeclaration,
    ArrowFunction,
    FunctionExpression,
    StringLiteral,
    Identifier,
    PropertyAssignment,
    ObjectLiteral,
    Other(&'static str),
}

impl NodeKind {
    fn classify(node: Node) -> Self {
        match node.kind() {
            "program" => NodeKind::SourceFile,
            "comment" => NodeKind::Comment,
            "class_declaration" | "abstract_class_declaration" | "class" => NodeKind::ClassDeclaration,
            "class_heritage" => NodeKind::ClassHeritage,
            "extends_clause" => NodeKind::ExtendsClause,
            "class_body" => NodeKind::ClassBody,
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                NodeKind::FunctionDeclaration
            }
            "variable_declarator" => NodeKind::VariableDeclaration,
            "method_definition" => {
                if has_token(node, &["get", "set"]) {
                    NodeKind::Accessor
                } else {
                    NodeKind::MethodDeclaration
                }
            }
            "method_signature" | "abstract_method_signature" => NodeKind::MethodDeclaration,
            "public_field_definition" | "field_definition" => NodeKind::PropertyDeclaration,
            "arrow_function" => NodeKind::ArrowFunction,
            "function_expression" | "function" | "generator_function" => NodeKind::FunctionExpression,
            "string" => NodeKind::StringLiteral,
            "identifier"
            | "property_identifier"
            | "private_property_identifier"
            | "shorthand_property_identifier"
            | "type_identifier" => NodeKind::Identifier,
            "pair" => NodeKind::PropertyAssignment,
            "object" => NodeKind::ObjectLiteral,
            other => NodeKind::Other(other),
        }
    }

    pub fn is_string_or_identifier(self) -> bool {
        matches!(self, NodeKind::StringLiteral | NodeKind::Identifier)
    }

    pub fn is_function_value(self) -> bool {
        matches!(self, NodeKind::ArrowFunction | NodeKind::FunctionExpression)
    }
}

#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    pub span: TextSpan,
    /// Start including attached doc comments (the span a cursor can land in).
    pub full_start: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Grammar field this node occupies in its parent (`name`, `key`, `value`...).
    pub field: Option<&'static str>,
    pub is_static: bool,
    /// Annotation tags from doc comments attached to this node.
    pub doc_tags: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct SyntaxTree {
    path: PathBuf,
    text: String,
    nodes: Vec<SyntaxNode>,
    line_starts: Vec<usize>,
}

pub fn path_ext_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Extensions parsed with the TypeScript grammar family.
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];

pub fn is_supported_path(path: &Path) -> bool {
    SOURCE_EXTENSIONS.contains(&path_ext_lower(path).as_str())
}

fn language_for_path(path: &Path) -> Language {
    match path_ext_lower(path).as_str() {
        "tsx" | "jsx" => tree_sitter_typescript::LANGUAGE_TSX.into(),
        // JS/TS share the TypeScript grammar for our purposes.
        _ => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    }
}

impl SyntaxTree {
    /// Parse `text` as the source of `path`.
    pub fn parse(path: &Path, text: String) -> Result<Self> {
        let language = language_for_path(path);
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .context("Failed to set tree-sitter language")?;

        let tree = parser
            .parse(text.as_str(), None)
            .ok_or_else(|| anyhow!("Failed to parse {}", path.display()))?;

        let nodes = {
            let mut builder = Builder {
                source: text.as_str(),
                nodes: Vec::new(),
            };
            builder.build(tree.root_node());
            builder.nodes
        };

        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            text,
            nodes,
            line_starts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind
    }

    pub fn span(&self, id: NodeId) -> TextSpan {
        self.nodes[id.0].span
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn field(&self, id: NodeId) -> Option<&'static str> {
        self.nodes[id.0].field
    }

    pub fn is_static(&self, id: NodeId) -> bool {
        self.nodes[id.0].is_static
    }

    pub fn doc_tags(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].doc_tags
    }

    pub fn text(&self, id: NodeId) -> &str {
        let span = self.nodes[id.0].span;
        self.text.get(span.start..span.end()).unwrap_or("")
    }

    pub fn child_by_field(&self, id: NodeId, field: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.field(c) == Some(field))
    }

    /// Name of an annotation tag (`namespace` for `@namespace Foo`).
    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        if self.kind(id) != NodeKind::AnnotationTag {
            return None;
        }
        let rest = self.text(id).strip_prefix('@')?;
        let end = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Text of a string literal without its quotes; other nodes verbatim.
    pub fn unquoted_text(&self, id: NodeId) -> &str {
        let span = self.unquoted_span(id);
        self.text.get(span.start..span.end()).unwrap_or("")
    }

    /// Span of a string literal without its quotes; other nodes unchanged.
    pub fn unquoted_span(&self, id: NodeId) -> TextSpan {
        let span = self.span(id);
        if self.kind(id) != NodeKind::StringLiteral || span.length < 2 {
            return span;
        }
        let text = self.text(id);
        let quoted = matches!(text.as_bytes()[0], b'\'' | b'"' | b'`');
        if quoted && text.as_bytes()[0] == text.as_bytes()[text.len() - 1] {
            TextSpan::new(span.start + 1, span.length - 2)
        } else {
            span
        }
    }

    /// 1-based (line, column) of a byte offset; the column counts bytes.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line).copied().unwrap_or(0);
        (line + 1, offset.saturating_sub(line_start) + 1)
    }
}

fn has_token(node: Node, tokens: &[&str]) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| !c.is_named() && tokens.contains(&c.kind()));
    found
}

fn is_doc_comment(text: &str) -> bool {
    text.starts_with("/**") && !text.starts_with("/**/")
}

/// Byte ranges (relative to the comment) of each `@tag` in a doc comment. A tag
/// starts at an `@` preceded on its line only by whitespace, `*` or `/`, and
/// runs until the next tag or the comment terminator.
fn tag_ranges(comment: &str) -> Vec<(usize, usize)> {
    let body_end = comment.strip_suffix("*/").map(str::len).unwrap_or(comment.len());

    let mut starts = Vec::new();
    let mut line_prefix_blank = true;
    for (i, ch) in comment[..body_end].char_indices() {
        match ch {
            '\n' => line_prefix_blank = true,
            '@' if line_prefix_blank => {
                starts.push(i);
                line_prefix_blank = false;
            }
            '*' | '/' | ' ' | '\t' | '\r' => {}
            _ => line_prefix_blank = false,
        }
    }

    let mut out = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(body_end);
        let trimmed = comment[start..end].trim_end_matches(|c: char| c.is_whitespace() || c == '*');
        out.push((start, start + trimmed.len()));
    }
    out
}

/// A grammar node waiting to be converted, with the doc comments that
/// precede it.
struct Frame<'t> {
    node: Node<'t>,
    parent: Option<NodeId>,
    field: Option<&'static str>,
    docs: Vec<Node<'t>>,
}

struct Builder<'s> {
    source: &'s str,
    nodes: Vec<SyntaxNode>,
}

impl<'s> Builder<'s> {
    fn new_node(
        &mut self,
        kind: NodeKind,
        span: TextSpan,
        parent: Option<NodeId>,
        field: Option<&'static str>,
        is_static: bool,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SyntaxNode {
            kind,
            span,
            full_start: span.start,
            parent,
            children: Vec::new(),
            field,
            is_static,
            doc_tags: Vec::new(),
        });
        id
    }

    /// Convert the tree under `root` in pre-order. Doc comments are attached
    /// once every node exists, since the host's children decide where they go.
    fn build<'t>(&mut self, root: Node<'t>) {
        let mut deferred: Vec<(NodeId, Vec<Node<'t>>)> = Vec::new();
        let mut stack = vec![Frame {
            node: root,
            parent: None,
            field: None,
            docs: Vec::new(),
        }];

        while let Some(frame) = stack.pop() {
            let node = frame.node;
            let span = TextSpan::from_bounds(node.start_byte(), node.end_byte());
            let id = self.new_node(
                NodeKind::classify(node),
                span,
                frame.parent,
                frame.field,
                has_token(node, &["static"]),
            );
            if let Some(p) = frame.parent {
                self.nodes[p.0].children.push(id);
            }
            if !frame.docs.is_empty() {
                deferred.push((id, frame.docs));
            }

            let mut children = Vec::new();
            let mut pending_docs = Vec::new();
            let mut cursor = node.walk();
            if cursor.goto_first_child() {
                loop {
                    let child = cursor.node();
                    if child.is_named() {
                        let child_field = cursor.field_name();
                        let is_comment = child.kind() == "comment";
                        if is_comment && is_doc_comment(&self.source[child.start_byte()..child.end_byte()]) {
                            pending_docs.push(child);
                        } else {
                            children.push(Frame {
                                node: child,
                                parent: Some(id),
                                field: child_field,
                                docs: if is_comment { Vec::new() } else { std::mem::take(&mut pending_docs) },
                            });
                        }
                    }
                    if !cursor.goto_next_sibling() {
                        break;
                    }
                }
            }

            // Doc comments with nothing after them document nothing.
            children.extend(pending_docs.into_iter().map(|doc| Frame {
                node: doc,
                parent: Some(id),
                field: None,
                docs: Vec::new(),
            }));

            // Reversed so siblings pop in source order.
            stack.extend(children.into_iter().rev());
        }

        for (host, docs) in deferred {
            for doc in docs {
                self.attach_doc(doc, host);
            }
        }
    }

    /// The node a doc comment in front of `sibling` documents.
    fn doc_host(&self, sibling: NodeId) -> NodeId {
        let node = &self.nodes[sibling.0];
        match node.kind {
            NodeKind::Other("export_statement") => node
                .children
                .iter()
                .copied()
                .find(|c| self.nodes[c.0].field == Some("declaration"))
                .map(|c| self.doc_host(c))
                .unwrap_or(sibling),
            NodeKind::Other("lexical_declaration" | "variable_declaration") => node
                .children
                .iter()
                .copied()
                .find(|c| self.nodes[c.0].kind == NodeKind::VariableDeclaration)
                .unwrap_or(sibling),
            _ => sibling,
        }
    }

    fn attach_doc(&mut self, doc: Node, sibling: NodeId) {
        let host = self.doc_host(sibling);
        let span = TextSpan::from_bounds(doc.start_byte(), doc.end_byte());
        let doc_id = self.new_node(NodeKind::DocComment, span, Some(host), None, false);

        let insert_at = self.nodes[host.0]
            .children
            .iter()
            .take_while(|c| self.nodes[c.0].kind == NodeKind::DocComment)
            .count();
        self.nodes[host.0].children.insert(insert_at, doc_id);

        let comment = &self.source[span.start..span.end()];
        for (start, end) in tag_ranges(comment) {
            let tag_span = TextSpan::from_bounds(span.start + start, span.start + end);
            let tag = self.new_node(NodeKind::AnnotationTag, tag_span, Some(doc_id), None, false);
            self.nodes[doc_id.0].children.push(tag);
            self.nodes[host.0].doc_tags.push(tag);
        }

        let mut cur = Some(host);
        while let Some(c) = cur {
            let n = &mut self.nodes[c.0];
            n.full_start = n.full_start.min(span.start);
            cur = n.parent;
        }
    }
}
