//! The node tree data model.
//!
//! A [`Node`] is the unit of the wire format: a tag, a map of string
//! attributes with unique keys, and content that is exactly one of the
//! [`NodeContent`] variants. The content kind is fixed at construction and
//! never reinterpreted; nodes are immutable once built.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Typed content of a [`Node`].
///
/// Exactly one variant per node, chosen at construction. `Empty` means the
/// node carries no content element at all, which is distinct from
/// `List(vec![])` (an explicitly empty child list on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeContent {
    /// No content element.
    Empty,
    /// Exactly one child node.
    Single(Box<Node>),
    /// An ordered sequence of child nodes.
    List(Vec<Node>),
    /// A raw byte payload.
    Binary(Bytes),
    /// A text string.
    Text(String),
}

/// A node in the wire tree.
///
/// Attribute keys are unique; the map is ordered so that encoding is
/// deterministic. Construction goes through the builder-style constructors;
/// after that the node is read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    content: NodeContent,
}

impl Node {
    /// A node with no attributes and no content.
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), attrs: BTreeMap::new(), content: NodeContent::Empty }
    }

    /// A node with text content.
    pub fn text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self { content: NodeContent::Text(text.into()), ..Self::new(tag) }
    }

    /// A node with a raw byte payload.
    pub fn binary(tag: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { content: NodeContent::Binary(data.into()), ..Self::new(tag) }
    }

    /// A node with an ordered list of children.
    pub fn list(tag: impl Into<String>, children: Vec<Node>) -> Self {
        Self { content: NodeContent::List(children), ..Self::new(tag) }
    }

    /// A node with exactly one child.
    pub fn single(tag: impl Into<String>, child: Node) -> Self {
        Self { content: NodeContent::Single(Box::new(child)), ..Self::new(tag) }
    }

    /// Builder: add or replace an attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Assemble a node from already-validated parts (decoder use).
    pub(crate) fn from_parts(
        tag: String,
        attrs: BTreeMap<String, String>,
        content: NodeContent,
    ) -> Self {
        Self { tag, attrs, content }
    }

    /// The node's tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Look up an attribute value.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// The full attribute map.
    #[must_use]
    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    /// The node's content.
    #[must_use]
    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    /// Child nodes, as a slice.
    ///
    /// `Single` content yields a one-element slice; non-child content yields
    /// an empty slice.
    #[must_use]
    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Single(child) => std::slice::from_ref(child),
            NodeContent::List(children) => children,
            _ => &[],
        }
    }

    /// First child with the given tag, if any.
    #[must_use]
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.tag == tag)
    }

    /// Text content, if this node carries text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            NodeContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Binary content, if this node carries raw bytes.
    #[must_use]
    pub fn as_binary(&self) -> Option<&Bytes> {
        match &self.content {
            NodeContent::Binary(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_replaces_duplicate_attribute() {
        let node = Node::new("iq").with_attr("type", "get").with_attr("type", "set");
        assert_eq!(node.attr("type"), Some("set"));
        assert_eq!(node.attrs().len(), 1);
    }

    #[test]
    fn children_view_covers_single_and_list() {
        let single = Node::single("message", Node::new("body"));
        assert_eq!(single.children().len(), 1);
        assert_eq!(single.child("body").map(Node::tag), Some("body"));

        let list = Node::list("iq", vec![Node::new("ping"), Node::new("pong")]);
        assert_eq!(list.children().len(), 2);

        let text = Node::text("body", "hi");
        assert!(text.children().is_empty());
        assert_eq!(text.as_text(), Some("hi"));
    }

    #[test]
    fn empty_and_empty_list_are_distinct() {
        assert_ne!(Node::new("a"), Node::list("a", vec![]));
    }
}
