use indexmap::IndexMap;
use serde_json::{Number, Value};

use crate::block::{Codeblock, Producer};

/// A document tree: ordered maps, sequences and scalar leaves, some of which
/// are live code blocks or deferred block producers.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<Node>),
    /// Keys are unique; insertion order is kept.
    Map(IndexMap<String, Node>),
    Block(Codeblock),
    Producer(Producer),
}

impl Node {
    /// Look up a child by map key or sequence index.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Map(entries) => entries.get(key),
            Node::Sequence(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Follow a dotted path such as `routes.0.handler`. The empty path is the
    /// node itself.
    pub fn pointer(&self, path: &str) -> Option<&Node> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |node, key| node.get(key))
    }

    pub fn as_block(&self) -> Option<&Codeblock> {
        match self {
            Node::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    /// Count the blocks and producers in the tree.
    pub fn block_count(&self) -> usize {
        match self {
            Node::Block(_) | Node::Producer(_) => 1,
            Node::Sequence(items) => items.iter().map(Node::block_count).sum(),
            Node::Map(entries) => entries.values().map(Node::block_count).sum(),
            _ => 0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::Sequence(_) => "sequence",
            Node::Map(_) => "map",
            Node::Block(_) => "block",
            Node::Producer(_) => "producer",
        }
    }
}

/// Plain conversion: no thawing of tagged strings.
impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Object(entries) => Node::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Node::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<Codeblock> for Node {
    fn from(block: Codeblock) -> Self {
        Node::Block(block)
    }
}

impl From<Producer> for Node {
    fn from(producer: Producer) -> Self {
        Node::Producer(producer)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl<K: Into<String>> FromIterator<(K, Node)> for Node {
    fn from_iter<I: IntoIterator<Item = (K, Node)>>(iter: I) -> Self {
        Node::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
