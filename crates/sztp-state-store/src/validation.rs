//! Validation Layer
//!
//! Checks request paths and input documents against the schema, and
//! re-checks every complete candidate tree (including leafref integrity)
//! before the Data Access Layer swaps it in.

use crate::error::ValidationError;
use crate::schema::{LeafType, NodeKind, Schema, SchemaNode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use sztp_core::{DataPath, MODULE};

/// Schema checks consumed by the request handlers and the Data Access Layer
pub trait ValidationLayer: Send + Sync {
    fn schema(&self) -> &Schema;

    /// The path must address a real schema node
    fn check_path(&self, path: &DataPath) -> Result<(), ValidationError>;

    /// `value` is the content of the node at `path` (already unwrapped)
    fn validate_document(&self, path: &DataPath, value: &Value) -> Result<(), ValidationError>;

    /// Whole-tree check of a candidate root, state included
    fn validate_candidate(&self, root: &Value) -> Result<(), ValidationError>;
}

/// Split `{"sztpd:name": value}` into the local name and its value.
pub fn unwrap_document(body: &Value) -> Result<(String, Value), ValidationError> {
    let obj = body
        .as_object()
        .ok_or_else(|| ValidationError::InvalidInputDocument("document must be a JSON object".into()))?;
    if obj.len() != 1 {
        return Err(ValidationError::InvalidInputDocument(format!(
            "document must contain exactly one top-level node, found {}",
            obj.len()
        )));
    }
    let (name, value) = obj
        .iter()
        .next()
        .ok_or_else(|| ValidationError::InvalidInputDocument("empty document".into()))?;
    match name.split_once(':') {
        Some((module, local)) if module == MODULE => Ok((local.to_string(), value.clone())),
        Some(_) => Err(ValidationError::UnrecognizedInputNode(name.clone())),
        None => Err(ValidationError::InvalidInputDocument(format!(
            "top-level node \"{}\" must be module-qualified",
            name
        ))),
    }
}

/// A list entry may be posted as an object or as a one-element array.
pub fn single_entry(value: Value) -> Result<Value, ValidationError> {
    match value {
        Value::Array(mut items) if items.len() == 1 => Ok(items.remove(0)),
        Value::Array(items) => Err(ValidationError::InvalidInputDocument(format!(
            "expected exactly one list entry, found {}",
            items.len()
        ))),
        other => Ok(other),
    }
}

/// Validation Layer over a compiled-in [`Schema`]
#[derive(Clone)]
pub struct SchemaValidator {
    schema: Arc<Schema>,
}

impl SchemaValidator {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }
}

impl ValidationLayer for SchemaValidator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn check_path(&self, path: &DataPath) -> Result<(), ValidationError> {
        self.schema.walk(path).map(|_| ())
    }

    fn validate_document(&self, path: &DataPath, value: &Value) -> Result<(), ValidationError> {
        let node = self.schema.find(path)?;
        let at = path.to_string();

        if path.is_root() {
            return check_members(node, value, &at, true);
        }
        match (node.list_key(), path.last().and_then(|s| s.key.as_deref())) {
            (Some(key_leaf), Some(key)) => {
                check_entry(node, value, &at, true)?;
                let given = value.get(key_leaf).map(scalar_text);
                if given.as_deref() != Some(key) {
                    return Err(ValidationError::InvalidInputDocument(format!(
                        "key leaf \"{}\" does not match \"{}\" in {}",
                        key_leaf, key, at
                    )));
                }
                Ok(())
            }
            _ => check_node(node, value, &at, true),
        }
    }

    fn validate_candidate(&self, root: &Value) -> Result<(), ValidationError> {
        check_members(&self.schema.root, root, "", false)?;
        let scope = Scope { value: root, is_root: true };
        check_refs(&self.schema.root, root, "", scope)
    }
}

/// String form of a scalar, used for list keys and leafref values
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn check_node(node: &SchemaNode, value: &Value, at: &str, input: bool) -> Result<(), ValidationError> {
    if input && !node.config {
        return Err(ValidationError::UnrecognizedInputNode(format!(
            "{} is operational state and cannot be written",
            at
        )));
    }
    match &node.kind {
        NodeKind::Container => check_members(node, value, at, input),
        NodeKind::List { key, .. } => {
            let entries = value
                .as_array()
                .ok_or_else(|| ValidationError::ValidationFailed(format!("{} must be a list", at)))?;
            let mut seen = HashSet::new();
            for entry in entries {
                check_entry(node, entry, at, input)?;
                if let Some(k) = key {
                    let key_value = entry.get(*k).map(scalar_text).unwrap_or_default();
                    if !seen.insert(key_value.clone()) {
                        return Err(ValidationError::ValidationFailed(format!(
                            "duplicate key \"{}\" in {}",
                            key_value, at
                        )));
                    }
                }
            }
            Ok(())
        }
        NodeKind::Leaf(ty) => check_leaf(ty, value, at),
        NodeKind::LeafList(ty) => {
            let items = value
                .as_array()
                .ok_or_else(|| ValidationError::ValidationFailed(format!("{} must be a leaf-list", at)))?;
            items.iter().try_for_each(|item| check_leaf(ty, item, at))
        }
        NodeKind::AnyData => Ok(()),
    }
}

fn check_entry(node: &SchemaNode, entry: &Value, at: &str, input: bool) -> Result<(), ValidationError> {
    if let Some(key) = node.list_key() {
        match entry.get(key) {
            Some(Value::String(_)) | Some(Value::Number(_)) => {}
            _ => {
                return Err(ValidationError::ValidationFailed(format!(
                    "list entry in {} is missing its key \"{}\"",
                    at, key
                )))
            }
        }
    }
    check_members(node, entry, at, input)
}

fn check_members(node: &SchemaNode, value: &Value, at: &str, input: bool) -> Result<(), ValidationError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::ValidationFailed(format!("{} must be an object", display(at))))?;
    for (name, member) in obj {
        let child_at = format!("{}/{}", at, name);
        let child = node
            .child(name)
            .ok_or_else(|| ValidationError::UnrecognizedInputNode(child_at.clone()))?;
        check_node(child, member, &child_at, input)?;
    }
    Ok(())
}

fn check_leaf(ty: &LeafType, value: &Value, at: &str) -> Result<(), ValidationError> {
    let ok = match ty {
        LeafType::String | LeafType::Leafref(_) => value.is_string(),
        LeafType::Uint => {
            value.as_u64().is_some() || value.as_str().is_some_and(|s| s.parse::<u64>().is_ok())
        }
        LeafType::Boolean => value.is_boolean(),
        LeafType::Empty => value.as_array().is_some_and(|a| a.len() == 1 && a[0].is_null()),
        LeafType::Binary => value.as_str().is_some_and(|s| STANDARD.decode(s).is_ok()),
        LeafType::Enumeration(allowed) => value.as_str().is_some_and(|s| allowed.contains(&s)),
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::ValidationFailed(format!(
            "invalid value {} for {} (expected {})",
            value,
            at,
            describe(ty)
        )))
    }
}

fn describe(ty: &LeafType) -> String {
    match ty {
        LeafType::String => "string".into(),
        LeafType::Uint => "unsigned integer".into(),
        LeafType::Boolean => "boolean".into(),
        LeafType::Empty => "empty".into(),
        LeafType::Binary => "base64 binary".into(),
        LeafType::Enumeration(allowed) => format!("one of {}", allowed.join(", ")),
        LeafType::Leafref(target) => format!("reference to {}", target),
    }
}

fn display(at: &str) -> &str {
    if at.is_empty() {
        "/"
    } else {
        at
    }
}

/// Key leaf of every referenceable list in the model
const REF_KEY: &str = "name";

#[derive(Clone, Copy)]
struct Scope<'a> {
    value: &'a Value,
    is_root: bool,
}

impl<'a> Scope<'a> {
    /// Entries of the scope-relative list `rel`, e.g. `device-types/device-type`
    fn list(&self, rel: &str) -> Option<&'a Vec<Value>> {
        let mut current = self.value;
        for (i, name) in rel.split('/').enumerate() {
            current = if i == 0 && self.is_root {
                current.get(format!("{}:{}", MODULE, name))?
            } else {
                current.get(name)?
            };
        }
        current.as_array()
    }
}

fn check_refs(node: &SchemaNode, value: &Value, at: &str, scope: Scope<'_>) -> Result<(), ValidationError> {
    match &node.kind {
        NodeKind::Leaf(LeafType::Leafref(target)) => check_ref(target, value, at, scope),
        NodeKind::LeafList(LeafType::Leafref(target)) => value
            .as_array()
            .into_iter()
            .flatten()
            .try_for_each(|item| check_ref(target, item, at, scope)),
        NodeKind::Container => walk_members(node, value, at, scope),
        NodeKind::List { .. } => {
            for entry in value.as_array().into_iter().flatten() {
                let entry_scope = if node.name == "tenant" {
                    Scope { value: entry, is_root: false }
                } else {
                    scope
                };
                walk_members(node, entry, at, entry_scope)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn walk_members(node: &SchemaNode, value: &Value, at: &str, scope: Scope<'_>) -> Result<(), ValidationError> {
    if let Some(obj) = value.as_object() {
        for (name, member) in obj {
            if let Some(child) = node.child(name) {
                check_refs(child, member, &format!("{}/{}", at, name), scope)?;
            }
        }
    }
    Ok(())
}

fn check_ref(target: &str, value: &Value, at: &str, scope: Scope<'_>) -> Result<(), ValidationError> {
    let wanted = scalar_text(value);
    let found = scope.list(target).is_some_and(|entries| {
        entries
            .iter()
            .any(|e| e.get(REF_KEY).map(scalar_text).as_deref() == Some(wanted.as_str()))
    });
    if found {
        Ok(())
    } else {
        Err(ValidationError::ValidationFailed(format!(
            "{} references nonexistent {} \"{}\"",
            at, target, wanted
        )))
    }
}
