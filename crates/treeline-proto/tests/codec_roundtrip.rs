//! Property-based tests for the tree codec.
//!
//! The central law is `decode(encode(n)) == n` for every constructible node.
//! Strategies deliberately mix dictionary and non-dictionary strings, JID and
//! non-JID attribute values, and every content kind, so the boundary cases
//! get the same coverage as the common path.

use proptest::collection::{btree_map, vec as prop_vec};
use proptest::prelude::*;
use treeline_proto::{Node, NodeContent, decode, encode, tokens};

fn string_strategy() -> BoxedStrategy<String> {
    prop_oneof![
        proptest::sample::select(tokens::DICTIONARY.to_vec()).prop_map(String::from),
        "[a-z0-9:_-]{1,16}",
        // Arbitrary short unicode, including the empty string.
        ".{0,8}",
    ]
    .boxed()
}

fn attr_value_strategy() -> BoxedStrategy<String> {
    prop_oneof![
        string_strategy(),
        // Canonical JIDs hit the packed encodings.
        "[0-9]{6,13}@tl\\.net",
        "[0-9]{6,13}\\.[1-9]:[1-9][0-9]?@tl\\.net",
        // Near-JIDs that must stay literal strings.
        "[0-9]{4,8}:0@tl\\.net",
    ]
    .boxed()
}

fn attrs_strategy() -> BoxedStrategy<std::collections::BTreeMap<String, String>> {
    btree_map(string_strategy(), attr_value_strategy(), 0..4).boxed()
}

fn build(tag: String, attrs: std::collections::BTreeMap<String, String>, content: NodeContent) -> Node {
    let node = match content {
        NodeContent::Empty => Node::new(tag),
        NodeContent::Single(child) => Node::single(tag, *child),
        NodeContent::List(children) => Node::list(tag, children),
        NodeContent::Binary(data) => Node::binary(tag, data),
        NodeContent::Text(text) => Node::text(tag, text),
    };
    attrs.into_iter().fold(node, |node, (k, v)| node.with_attr(k, v))
}

fn leaf_content_strategy() -> BoxedStrategy<NodeContent> {
    prop_oneof![
        Just(NodeContent::Empty),
        Just(NodeContent::List(vec![])),
        prop_vec(any::<u8>(), 0..300).prop_map(|b| NodeContent::Binary(b.into())),
        string_strategy().prop_map(NodeContent::Text),
    ]
    .boxed()
}

fn node_strategy() -> BoxedStrategy<Node> {
    let leaf = (string_strategy(), attrs_strategy(), leaf_content_strategy())
        .prop_map(|(tag, attrs, content)| build(tag, attrs, content));

    leaf.prop_recursive(3, 24, 4, |inner| {
        let content = prop_oneof![
            leaf_content_strategy(),
            inner.clone().prop_map(|child| NodeContent::Single(Box::new(child))),
            prop_vec(inner, 0..4).prop_map(NodeContent::List),
        ];
        (string_strategy(), attrs_strategy(), content)
            .prop_map(|(tag, attrs, content)| build(tag, attrs, content))
    })
    .boxed()
}

proptest! {
    #[test]
    fn round_trip(node in node_strategy()) {
        let wire = encode(&node).expect("well-formed nodes always encode");
        let parsed = decode(&wire).expect("encoder output always decodes");
        prop_assert_eq!(parsed, node);
    }

    #[test]
    fn dictionary_and_literal_tags_decode_identically(index in 0..tokens::DICTIONARY.len()) {
        // A dictionary word used as text content must decode to the same
        // string whether it arrived as a token or as literal bytes.
        let word = tokens::DICTIONARY[index];
        let node = Node::text("body", word);
        let parsed = decode(&encode(&node).expect("encode")).expect("decode");
        prop_assert_eq!(parsed.as_text(), Some(word));
    }

    #[test]
    fn decode_never_panics(bytes in prop_vec(any::<u8>(), 0..512)) {
        // Any result is fine; the property is the absence of panics and
        // unbounded allocation on attacker-controlled input.
        let _ = decode(&bytes);
    }

    #[test]
    fn encoding_is_deterministic(node in node_strategy()) {
        prop_assert_eq!(encode(&node).expect("encode"), encode(&node).expect("encode"));
    }
}
