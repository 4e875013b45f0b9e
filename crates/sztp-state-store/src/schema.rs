//! Schema tree
//!
//! A small in-memory rendition of a YANG data model: containers, keyed
//! lists, leaves, leaf-lists and free-form anydata, each marked as
//! configuration or operational state.

use crate::error::ValidationError;
use sztp_core::{DataPath, PathSegment, MODULE};

/// Value type of a leaf or leaf-list entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafType {
    String,
    Uint,
    Boolean,
    /// YANG `empty`, encoded as `[null]`
    Empty,
    /// base64 text
    Binary,
    Enumeration(&'static [&'static str]),
    /// Reference to the key of an entry of the list at the given scope-relative path
    Leafref(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Container,
    /// `key` is `None` for keyless (state) lists
    List { key: Option<&'static str>, ordered_by_user: bool },
    Leaf(LeafType),
    LeafList(LeafType),
    AnyData,
}

#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub name: &'static str,
    pub kind: NodeKind,
    pub config: bool,
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        let local = name.split_once(':').map(|(_, l)| l).unwrap_or(name);
        self.children.iter().find(|c| c.name == local)
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, NodeKind::List { .. })
    }

    pub fn is_leafy(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_) | NodeKind::LeafList(_))
    }

    pub fn list_key(&self) -> Option<&'static str> {
        match self.kind {
            NodeKind::List { key, .. } => key,
            _ => None,
        }
    }

    pub fn ordered_by_user(&self) -> bool {
        matches!(self.kind, NodeKind::List { ordered_by_user: true, .. })
    }

    /// Mark this node and everything below it as operational state
    pub fn state(mut self) -> Self {
        fn mark(node: &mut SchemaNode) {
            node.config = false;
            node.children.iter_mut().for_each(mark);
        }
        mark(&mut self);
        self
    }

    pub fn ordered(mut self) -> Self {
        if let NodeKind::List { key, .. } = self.kind {
            self.kind = NodeKind::List { key, ordered_by_user: true };
        }
        self
    }
}

pub fn container(name: &'static str, children: Vec<SchemaNode>) -> SchemaNode {
    SchemaNode {
        name,
        kind: NodeKind::Container,
        config: true,
        children,
    }
}

pub fn list(name: &'static str, key: &'static str, children: Vec<SchemaNode>) -> SchemaNode {
    SchemaNode {
        name,
        kind: NodeKind::List {
            key: Some(key),
            ordered_by_user: false,
        },
        config: true,
        children,
    }
}

pub fn leaf(name: &'static str, ty: LeafType) -> SchemaNode {
    SchemaNode {
        name,
        kind: NodeKind::Leaf(ty),
        config: true,
        children: Vec::new(),
    }
}

pub fn leaf_list(name: &'static str, ty: LeafType) -> SchemaNode {
    SchemaNode {
        name,
        kind: NodeKind::LeafList(ty),
        config: true,
        children: Vec::new(),
    }
}

pub fn anydata(name: &'static str) -> SchemaNode {
    SchemaNode {
        name,
        kind: NodeKind::AnyData,
        config: true,
        children: Vec::new(),
    }
}

/// The complete data model; its top-level nodes are the children of `root`
#[derive(Debug, Clone)]
pub struct Schema {
    pub root: SchemaNode,
}

impl Schema {
    pub fn new(top_level: Vec<SchemaNode>) -> Self {
        Self {
            root: container("", top_level),
        }
    }

    /// Schema nodes addressed by each segment of `path`.
    ///
    /// Returns `InvalidDataPath` for malformed addressing (missing module
    /// prefix, keys on non-lists, keyless intermediate list segments) and
    /// `NonexistentSchemaNode` when a segment names no schema node.
    pub fn walk(&self, path: &DataPath) -> Result<Vec<&SchemaNode>, ValidationError> {
        let mut nodes = Vec::with_capacity(path.len());
        let mut current = &self.root;
        let count = path.len();

        for (i, seg) in path.segments().iter().enumerate() {
            check_qualification(i, seg, path)?;
            let node = current
                .child(&seg.name)
                .ok_or_else(|| ValidationError::NonexistentSchemaNode(path.to_string()))?;

            match (&node.kind, &seg.key) {
                (NodeKind::List { key: Some(_), .. }, None) if i + 1 < count => {
                    return Err(ValidationError::InvalidDataPath(format!(
                        "list \"{}\" needs a key in {}",
                        seg.name, path
                    )));
                }
                (NodeKind::List { key: None, .. }, Some(_)) => {
                    return Err(ValidationError::InvalidDataPath(format!(
                        "keyless list \"{}\" cannot be addressed by key in {}",
                        seg.name, path
                    )));
                }
                (NodeKind::List { key: None, .. }, None) if i + 1 < count => {
                    return Err(ValidationError::InvalidDataPath(format!(
                        "cannot descend into keyless list \"{}\" in {}",
                        seg.name, path
                    )));
                }
                (kind, Some(_)) if !matches!(kind, NodeKind::List { .. }) => {
                    return Err(ValidationError::InvalidDataPath(format!(
                        "\"{}\" is not a list in {}",
                        seg.name, path
                    )));
                }
                (NodeKind::Leaf(_) | NodeKind::LeafList(_) | NodeKind::AnyData, _) if i + 1 < count => {
                    return Err(ValidationError::NonexistentSchemaNode(path.to_string()));
                }
                _ => {}
            }
            nodes.push(node);
            current = node;
        }
        Ok(nodes)
    }

    /// Schema node addressed by `path` (the implicit root for an empty path)
    pub fn find(&self, path: &DataPath) -> Result<&SchemaNode, ValidationError> {
        Ok(self.walk(path)?.last().copied().unwrap_or(&self.root))
    }

    /// Lookup by schema path such as `/sztpd:devices/device`
    pub fn find_schema_path(&self, schema_path: &str) -> Option<&SchemaNode> {
        schema_path
            .split('/')
            .filter(|s| !s.is_empty())
            .try_fold(&self.root, |node, name| node.child(name))
    }
}

fn check_qualification(i: usize, seg: &PathSegment, path: &DataPath) -> Result<(), ValidationError> {
    match seg.name.split_once(':') {
        None if i == 0 => Err(ValidationError::InvalidDataPath(format!(
            "top-level node \"{}\" must be module-qualified in {}",
            seg.name, path
        ))),
        Some((module, _)) if module != MODULE => {
            Err(ValidationError::NonexistentSchemaNode(path.to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            container(
                "devices",
                vec![list(
                    "device",
                    "serial-number",
                    vec![
                        leaf("serial-number", LeafType::String),
                        leaf("activation-code", LeafType::String),
                        container("bootstrapping-log", vec![anydata("log-entry")]).state(),
                    ],
                )],
            ),
            leaf("flag", LeafType::Boolean),
        ])
    }

    #[test]
    fn test_walk_valid_paths() {
        let schema = sample();
        let path = DataPath::parse("/sztpd:devices/device=A/activation-code").unwrap();
        let nodes = schema.walk(&path).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[2].name, "activation-code");

        let whole_list = DataPath::parse("/sztpd:devices/device").unwrap();
        assert!(schema.find(&whole_list).unwrap().is_list());
    }

    #[test]
    fn test_walk_errors() {
        let schema = sample();
        let bad = |p: &str| schema.walk(&DataPath::parse(p).unwrap()).unwrap_err();

        assert!(matches!(bad("/devices"), ValidationError::InvalidDataPath(_)));
        assert!(matches!(bad("/sztpd:devices/device/activation-code"), ValidationError::InvalidDataPath(_)));
        assert!(matches!(bad("/sztpd:devices=1"), ValidationError::InvalidDataPath(_)));
        assert!(matches!(bad("/sztpd:nothing"), ValidationError::NonexistentSchemaNode(_)));
        assert!(matches!(bad("/other:devices"), ValidationError::NonexistentSchemaNode(_)));
        assert!(matches!(bad("/sztpd:flag/below"), ValidationError::NonexistentSchemaNode(_)));
    }

    #[test]
    fn test_state_marking() {
        let schema = sample();
        let log = schema
            .find_schema_path("/sztpd:devices/device/bootstrapping-log/log-entry")
            .unwrap();
        assert!(!log.config);
        assert!(schema.find_schema_path("/sztpd:devices/device/activation-code").unwrap().config);
    }
}
