//! Namespaced tool registry.
//!
//! Holds the tool tree, resolves dotted paths to leaves, and walks the tree
//! in stable lexicographic pre-order for catalog generation. Registration
//! is serialized; two registrations at the same path fail the second.

use std::collections::BTreeMap;
use std::sync::Arc;

use jsonschema::JSONSchema;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::RegistryError;
use crate::types::ApprovalMode;

use super::Tool;

/// A registered leaf: the tool plus its input validator, compiled once.
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
    validator: Arc<JSONSchema>,
}

impl RegisteredTool {
    /// Validate an input value against the tool's input schema.
    pub fn validate_input(&self, input: &Value) -> Result<(), String> {
        if let Err(errors) = self.validator.validate(input) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(detail);
        }
        Ok(())
    }
}

enum Node {
    Branch(BTreeMap<String, Node>),
    Leaf(RegisteredTool),
}

/// Catalog entry rendered for the LM system prompt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CatalogEntry {
    pub path: String,
    pub description: String,
    pub approval: ApprovalMode,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// Registry for the namespaced tool tree.
#[derive(Default)]
pub struct ToolRegistry {
    root: RwLock<BTreeMap<String, Node>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool at its canonical path.
    ///
    /// Fails with `Duplicate` when the exact path is taken or the path
    /// collides with an existing namespace or leaf prefix.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let path = tool.path().to_string();
        let segments = split_path(&path)?;

        let schema = tool.input_schema();
        let validator =
            JSONSchema::compile(&schema).map_err(|e| RegistryError::InvalidSchema {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        let registered = RegisteredTool {
            tool,
            validator: Arc::new(validator),
        };

        let mut root = self.root.write();
        let mut current = &mut *root;
        let (leaf_segment, branch_segments) = segments.split_last().expect("segments non-empty");

        for segment in branch_segments {
            let node = current
                .entry((*segment).to_string())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));
            match node {
                Node::Branch(children) => current = children,
                Node::Leaf(_) => {
                    return Err(RegistryError::Duplicate(path));
                }
            }
        }

        match current.entry((*leaf_segment).to_string()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(Node::Leaf(registered));
                tracing::debug!(tool = %path, "Registered tool");
                Ok(())
            }
            std::collections::btree_map::Entry::Occupied(_) => {
                Err(RegistryError::Duplicate(path))
            }
        }
    }

    /// Resolve a dotted path to a leaf.
    pub fn resolve(&self, path: &str) -> Result<RegisteredTool, RegistryError> {
        let segments = split_path(path)?;
        let root = self.root.read();
        let mut current = &*root;
        let (leaf_segment, branch_segments) = segments.split_last().expect("segments non-empty");

        for segment in branch_segments {
            match current.get(*segment) {
                Some(Node::Branch(children)) => current = children,
                _ => return Err(RegistryError::NotFound(path.to_string())),
            }
        }

        match current.get(*leaf_segment) {
            Some(Node::Leaf(registered)) => Ok(registered.clone()),
            _ => Err(RegistryError::NotFound(path.to_string())),
        }
    }

    /// Pre-order traversal in stable lexicographic segment order.
    pub fn walk(&self, mut visitor: impl FnMut(&str, &Arc<dyn Tool>)) {
        fn visit(
            prefix: &mut Vec<String>,
            children: &BTreeMap<String, Node>,
            visitor: &mut impl FnMut(&str, &Arc<dyn Tool>),
        ) {
            for (segment, node) in children {
                prefix.push(segment.clone());
                match node {
                    Node::Leaf(registered) => {
                        visitor(&prefix.join("."), &registered.tool);
                    }
                    Node::Branch(children) => visit(prefix, children, visitor),
                }
                prefix.pop();
            }
        }

        let root = self.root.read();
        let mut prefix = Vec::new();
        visit(&mut prefix, &root, &mut visitor);
    }

    /// Render the catalog for prompt generation, in walk order.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let mut entries = Vec::new();
        self.walk(|path, tool| {
            entries.push(CatalogEntry {
                path: path.to_string(),
                description: tool.description().to_string(),
                approval: tool.approval(),
                input_schema: tool.input_schema(),
                output_schema: tool.output_schema(),
            });
        });
        entries
    }

    pub fn len(&self) -> usize {
        let mut count = 0;
        self.walk(|_, _| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn split_path(path: &str) -> Result<Vec<&str>, RegistryError> {
    if path.is_empty() {
        return Err(RegistryError::InvalidPath {
            path: path.to_string(),
            reason: "empty path".to_string(),
        });
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RegistryError::InvalidPath {
            path: path.to_string(),
            reason: "empty segment".to_string(),
        });
    }
    Ok(segments)
}
