//! In-memory tree store
//!
//! The datastore is one ordered JSON document: top-level members are
//! module-qualified, lists are arrays of entries identified by their key
//! leaf. Every write builds a candidate copy, validates it as a whole, swaps
//! it in, and then derives the change events that drive callbacks.

use crate::dal::{DataAccessLayer, Insert};
use crate::error::{DalError, DalResult, ValidationError};
use crate::schema::{LeafType, NodeKind, Schema, SchemaNode};
use crate::sqlite_store::SqliteStore;
use crate::validation::{scalar_text, ValidationLayer};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use sztp_core::{
    CallbackError, CallbackRegistry, ChangeEvent, DataPath, EventKind, RefAction, Transaction, MODULE,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Data Access Layer over an in-memory tree, optionally persisted to SQLite
pub struct MemoryStore {
    validator: Arc<dyn ValidationLayer>,
    tree: RwLock<Value>,
    persistence: Option<SqliteStore>,
}

impl MemoryStore {
    /// Empty, non-persistent store
    pub fn new(validator: Arc<dyn ValidationLayer>) -> Self {
        Self {
            validator,
            tree: RwLock::new(Value::Object(Map::new())),
            persistence: None,
        }
    }

    /// Non-persistent store seeded with a (validated) document
    pub fn with_document(validator: Arc<dyn ValidationLayer>, doc: Value) -> DalResult<Self> {
        validator.validate_candidate(&doc)?;
        Ok(Self {
            validator,
            tree: RwLock::new(doc),
            persistence: None,
        })
    }

    /// Store backed by SQLite, starting from its last saved document
    pub async fn open(validator: Arc<dyn ValidationLayer>, store: SqliteStore) -> DalResult<Self> {
        let doc = store
            .load()
            .await?
            .unwrap_or_else(|| Value::Object(Map::new()));
        validator.validate_candidate(&doc)?;
        info!("Datastore loaded ({} top-level nodes)", doc.as_object().map_or(0, Map::len));
        Ok(Self {
            validator,
            tree: RwLock::new(doc),
            persistence: Some(store),
        })
    }

    fn schema(&self) -> &Schema {
        self.validator.schema()
    }

    async fn persist(&self, tree: &Value) -> DalResult<()> {
        if let Some(store) = &self.persistence {
            store.save(tree).await?;
        }
        Ok(())
    }

    /// Swap in a validated candidate, dispatch callbacks and the checks
    /// they deferred, persist.
    ///
    /// The tree is persisted even when a callback fails: the write has
    /// already been committed and is not rolled back.
    async fn commit(
        &self,
        tree: &mut Value,
        candidate: Value,
        events: Vec<ChangeEvent>,
        txn: &mut Transaction<'_>,
    ) -> DalResult<()> {
        self.validator.validate_candidate(&candidate)?;
        *tree = candidate;
        debug!(events = events.len(), "datastore commit");
        let outcome = fire_events(self.schema(), tree, &events, txn)
            .and_then(|()| std::mem::take(&mut txn.deferred).run(tree));
        self.persist(tree).await?;
        outcome.map_err(DalError::from)
    }
}

#[async_trait]
impl DataAccessLayer for MemoryStore {
    async fn get_config(&self, path: &DataPath) -> DalResult<Value> {
        let node = self.schema().find(path)?;
        if !node.config {
            return Err(ValidationError::NonexistentSchemaNode(format!(
                "{} is not configuration",
                path
            ))
            .into());
        }
        let tree = self.tree.read().await;
        let mut value = locate(&tree, self.schema(), path)
            .cloned()
            .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;
        strip_state(node, &mut value);
        Ok(value)
    }

    async fn get_opstate(&self, path: &DataPath) -> DalResult<Value> {
        self.schema().find(path)?;
        let tree = self.tree.read().await;
        locate(&tree, self.schema(), path)
            .cloned()
            .ok_or_else(|| DalError::NodeNotFound(path.to_string()))
    }

    async fn exists(&self, path: &DataPath) -> DalResult<bool> {
        self.schema().find(path)?;
        let tree = self.tree.read().await;
        Ok(locate(&tree, self.schema(), path).is_some())
    }

    async fn post(
        &self,
        parent: &DataPath,
        name: &str,
        value: Value,
        insert: &Insert,
        txn: &mut Transaction<'_>,
    ) -> DalResult<DataPath> {
        let schema = self.schema();
        let parent_node = schema.find(parent)?;
        if parent_node.is_list() && parent.last().is_some_and(|s| s.key.is_none()) {
            return Err(ValidationError::InvalidDataPath(format!(
                "cannot create below list {} without a key",
                parent
            ))
            .into());
        }
        let child = parent_node
            .child(name)
            .ok_or_else(|| ValidationError::NonexistentSchemaNode(format!("{}/{}", parent, name)))?;
        if !child.config {
            return Err(ValidationError::UnrecognizedInputNode(format!(
                "{}/{} is operational state and cannot be written",
                parent, name
            ))
            .into());
        }

        let mut tree = self.tree.write().await;
        if locate(&tree, schema, parent).is_none() {
            return Err(DalError::ParentNodeNotFound(parent.to_string()));
        }

        let mut candidate = tree.clone();
        let target = {
            let obj = locate_mut(&mut candidate, schema, parent)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| DalError::ParentNodeNotFound(parent.to_string()))?;
            let member = member_key(parent.is_root(), child.name);
            match child.list_key() {
                Some(key_leaf) => {
                    let key = value.get(key_leaf).map(scalar_text).ok_or_else(|| {
                        ValidationError::ValidationFailed(format!(
                            "new {} entry is missing its key \"{}\"",
                            child.name, key_leaf
                        ))
                    })?;
                    let path = parent.child(child.name, Some(&key));
                    let entries = obj
                        .entry(member)
                        .or_insert_with(|| Value::Array(Vec::new()))
                        .as_array_mut()
                        .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;
                    if entries.iter().any(|e| key_matches(e, key_leaf, &key)) {
                        return Err(DalError::NodeAlreadyExists(path.to_string()));
                    }
                    insert_entry(entries, value, key_leaf, insert)?;
                    path
                }
                None => {
                    let path = parent.child(child.name, None);
                    if obj.contains_key(&member) {
                        return Err(DalError::NodeAlreadyExists(path.to_string()));
                    }
                    obj.insert(member, value);
                    path
                }
            }
        };

        let events = collect_events(schema, &target, &tree, &candidate, txn.registry)?;
        self.commit(&mut tree, candidate, events, txn).await?;
        Ok(target)
    }

    async fn put(
        &self,
        path: &DataPath,
        value: Value,
        insert: &Insert,
        txn: &mut Transaction<'_>,
    ) -> DalResult<bool> {
        let schema = self.schema();
        let node = schema.find(path)?;
        if !node.config {
            return Err(ValidationError::UnrecognizedInputNode(format!(
                "{} is operational state and cannot be written",
                path
            ))
            .into());
        }

        let mut tree = self.tree.write().await;
        let mut value = value;
        let (candidate, created) = if path.is_root() {
            carry_state(&schema.root, &tree, &mut value, true);
            (value, false)
        } else {
            let parent = path.parent().unwrap_or_default();
            if locate(&tree, schema, &parent).is_none() {
                return Err(DalError::ParentNodeNotFound(parent.to_string()));
            }
            let mut candidate = tree.clone();
            let obj = locate_mut(&mut candidate, schema, &parent)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| DalError::ParentNodeNotFound(parent.to_string()))?;
            let member = member_key(parent.is_root(), node.name);
            let key = path.last().and_then(|s| s.key.clone());

            let created = match (key, node.list_key()) {
                (Some(key), Some(key_leaf)) => {
                    let entries = obj
                        .entry(member)
                        .or_insert_with(|| Value::Array(Vec::new()))
                        .as_array_mut()
                        .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;
                    match entries.iter().position(|e| key_matches(e, key_leaf, &key)) {
                        Some(i) => {
                            carry_state(node, &entries[i], &mut value, false);
                            entries[i] = value;
                            false
                        }
                        None => {
                            insert_entry(entries, value, key_leaf, insert)?;
                            true
                        }
                    }
                }
                _ => {
                    let created = match obj.get(&member) {
                        Some(old) => {
                            carry_state(node, old, &mut value, false);
                            false
                        }
                        None => true,
                    };
                    obj.insert(member, value);
                    created
                }
            };
            (candidate, created)
        };

        let events = collect_events(schema, path, &tree, &candidate, txn.registry)?;
        self.commit(&mut tree, candidate, events, txn).await?;
        Ok(created)
    }

    async fn delete(&self, path: &DataPath, txn: &mut Transaction<'_>) -> DalResult<()> {
        let schema = self.schema();
        let node = schema.find(path)?;
        if path.is_root() {
            return Err(ValidationError::InvalidDataPath("the datastore root cannot be deleted".into()).into());
        }
        if !node.config {
            return Err(ValidationError::UnrecognizedInputNode(format!(
                "{} is operational state and cannot be deleted",
                path
            ))
            .into());
        }

        let mut tree = self.tree.write().await;
        if locate(&tree, schema, path).is_none() {
            return Err(DalError::NodeNotFound(path.to_string()));
        }

        let mut candidate = tree.clone();
        let parent = path.parent().unwrap_or_default();
        let obj = locate_mut(&mut candidate, schema, &parent)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;
        let member = member_key(parent.is_root(), node.name);
        match (path.last().and_then(|s| s.key.as_deref()), node.list_key()) {
            (Some(key), Some(key_leaf)) => {
                if let Some(entries) = obj.get_mut(&member).and_then(Value::as_array_mut) {
                    entries.retain(|e| !key_matches(e, key_leaf, key));
                    if entries.is_empty() {
                        obj.remove(&member);
                    }
                }
            }
            _ => {
                obj.remove(&member);
            }
        }

        let events = collect_events(schema, path, &tree, &candidate, txn.registry)?;
        self.commit(&mut tree, candidate, events, txn).await
    }

    async fn append_opstate(&self, path: &DataPath, entry: Value) -> DalResult<()> {
        let schema = self.schema();
        let node = schema.find(path)?;
        if node.config {
            return Err(ValidationError::ValidationFailed(format!("{} is not operational state", path)).into());
        }
        let parent = path.parent().unwrap_or_default();
        let member = path
            .last()
            .map(|s| member_key(parent.is_root(), s.local_name()))
            .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;

        let mut tree = self.tree.write().await;
        {
            let holder = ensure_mut(&mut tree, schema, &parent)?
                .as_object_mut()
                .ok_or_else(|| DalError::NodeNotFound(parent.to_string()))?;
            let list = holder
                .entry(member)
                .or_insert_with(|| Value::Array(Vec::new()));
            match list.as_array_mut() {
                Some(entries) => entries.push(entry),
                None => *list = Value::Array(vec![entry]),
            }
        }
        self.persist(&tree).await
    }

    async fn modify_opstate(
        &self,
        path: &DataPath,
        edit: Box<dyn for<'v> FnOnce(&'v mut Value) + Send>,
    ) -> DalResult<()> {
        let schema = self.schema();
        let node = schema.find(path)?;
        if node.config {
            return Err(ValidationError::ValidationFailed(format!("{} is not operational state", path)).into());
        }
        let mut tree = self.tree.write().await;
        edit(ensure_mut(&mut tree, schema, path)?);
        self.persist(&tree).await
    }

    async fn list_len(&self, path: &DataPath) -> DalResult<usize> {
        self.schema().find(path)?;
        let tree = self.tree.read().await;
        Ok(locate(&tree, self.schema(), path)
            .and_then(Value::as_array)
            .map_or(0, Vec::len))
    }

    async fn find_tenant_for_device(&self, serial_number: &str) -> DalResult<Option<String>> {
        let tree = self.tree.read().await;
        let tenants = tree
            .get(format!("{}:tenants", MODULE))
            .and_then(|t| t.get("tenant"))
            .and_then(Value::as_array);
        Ok(tenants.into_iter().flatten().find_map(|tenant| {
            let holds = tenant
                .get("devices")
                .and_then(|d| d.get("device"))
                .and_then(Value::as_array)
                .is_some_and(|devices| {
                    devices
                        .iter()
                        .any(|d| key_matches(d, "serial-number", serial_number))
                });
            if holds {
                tenant.get("name").map(scalar_text)
            } else {
                None
            }
        }))
    }

    async fn snapshot(&self) -> Value {
        self.tree.read().await.clone()
    }
}

/// Name of a member in its parent object: qualified at the top level only
fn member_key(top: bool, name: &str) -> String {
    let local = name.split_once(':').map(|(_, l)| l).unwrap_or(name);
    if top {
        format!("{}:{}", MODULE, local)
    } else {
        local.to_string()
    }
}

fn key_matches(entry: &Value, key_leaf: &str, key: &str) -> bool {
    entry.get(key_leaf).map(scalar_text).as_deref() == Some(key)
}

fn insert_entry(
    entries: &mut Vec<Value>,
    value: Value,
    key_leaf: &str,
    insert: &Insert,
) -> Result<(), ValidationError> {
    match insert {
        Insert::First => entries.insert(0, value),
        Insert::Last => entries.push(value),
        Insert::Before(point) | Insert::After(point) => {
            let i = entries
                .iter()
                .position(|e| key_matches(e, key_leaf, point))
                .ok_or_else(|| {
                    ValidationError::InvalidQueryParameter(format!("point \"{}\" does not exist", point))
                })?;
            let at = if matches!(insert, Insert::Before(_)) { i } else { i + 1 };
            entries.insert(at, value);
        }
    }
    Ok(())
}

/// Node at `path` within `root`, if present
pub fn locate<'v>(root: &'v Value, schema: &Schema, path: &DataPath) -> Option<&'v Value> {
    let nodes = schema.walk(path).ok()?;
    let mut cur = root;
    for (i, (seg, node)) in path.segments().iter().zip(nodes).enumerate() {
        cur = cur.get(member_key(i == 0, &seg.name))?;
        if let Some(key) = &seg.key {
            let key_leaf = node.list_key()?;
            cur = cur.as_array()?.iter().find(|e| key_matches(e, key_leaf, key))?;
        }
    }
    Some(cur)
}

fn locate_mut<'v>(root: &'v mut Value, schema: &Schema, path: &DataPath) -> Option<&'v mut Value> {
    let nodes = schema.walk(path).ok()?;
    let mut cur = root;
    for (i, (seg, node)) in path.segments().iter().zip(nodes).enumerate() {
        cur = cur.get_mut(member_key(i == 0, &seg.name))?;
        if let Some(key) = &seg.key {
            let key_leaf = node.list_key()?;
            cur = cur
                .as_array_mut()?
                .iter_mut()
                .find(|e| key_matches(e, key_leaf, key))?;
        }
    }
    Some(cur)
}

/// Like `locate_mut`, but creates missing state containers. Missing
/// configuration nodes and list entries are an error.
fn ensure_mut<'v>(root: &'v mut Value, schema: &Schema, path: &DataPath) -> DalResult<&'v mut Value> {
    let nodes = schema.walk(path)?;
    let mut cur = root;
    for (i, (seg, node)) in path.segments().iter().zip(nodes).enumerate() {
        let member = member_key(i == 0, &seg.name);
        let obj = cur
            .as_object_mut()
            .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;
        match &seg.key {
            Some(key) => {
                let key_leaf = node
                    .list_key()
                    .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;
                cur = obj
                    .get_mut(&member)
                    .and_then(Value::as_array_mut)
                    .and_then(|entries| entries.iter_mut().find(|e| key_matches(e, key_leaf, key)))
                    .ok_or_else(|| DalError::NodeNotFound(path.to_string()))?;
            }
            None => {
                if node.config && !obj.contains_key(&member) {
                    return Err(DalError::NodeNotFound(path.to_string()));
                }
                cur = obj
                    .entry(member)
                    .or_insert_with(|| Value::Object(Map::new()));
            }
        }
    }
    Ok(cur)
}

fn strip_state(node: &SchemaNode, value: &mut Value) {
    match value {
        Value::Array(entries) if node.is_list() => {
            entries.iter_mut().for_each(|e| strip_members(node, e));
        }
        Value::Object(_) => strip_members(node, value),
        _ => {}
    }
}

fn strip_members(node: &SchemaNode, value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        obj.retain(|name, _| node.child(name).map_or(true, |c| c.config));
        for (name, member) in obj.iter_mut() {
            if let Some(child) = node.child(name) {
                strip_state(child, member);
            }
        }
    }
}

/// Copy state children of `old` that `new` lacks, so a replace keeps logs and statistics.
fn carry_state(node: &SchemaNode, old: &Value, new: &mut Value, top: bool) {
    match (old, new) {
        (Value::Array(olds), Value::Array(news)) => {
            if let Some(key_leaf) = node.list_key() {
                for entry in news.iter_mut() {
                    let key = entry.get(key_leaf).map(scalar_text).unwrap_or_default();
                    if let Some(prev) = olds.iter().find(|o| key_matches(o, key_leaf, &key)) {
                        carry_state(node, prev, entry, false);
                    }
                }
            }
        }
        (Value::Object(old_obj), Value::Object(new_obj)) => {
            for child in &node.children {
                let name = member_key(top, child.name);
                let Some(prev) = old_obj.get(&name) else {
                    continue;
                };
                if !child.config {
                    new_obj.entry(name).or_insert_with(|| prev.clone());
                } else if let Some(next) = new_obj.get_mut(&name) {
                    carry_state(child, prev, next, false);
                }
            }
        }
        _ => {}
    }
}

/// Change events of a write at `path`, in document order, followed by the
/// subtree/somehow events of registered ancestors.
fn collect_events(
    schema: &Schema,
    path: &DataPath,
    old_root: &Value,
    new_root: &Value,
    registry: &CallbackRegistry,
) -> DalResult<Vec<ChangeEvent>> {
    let node = schema.find(path)?;
    let old = locate(old_root, schema, path);
    let new = locate(new_root, schema, path);
    let mut events = Vec::new();

    if path.is_root() {
        diff_members(node, path, old, new, &mut events);
    } else if node.is_list() && path.last().is_some_and(|s| s.key.is_none()) {
        let parent = path.parent().unwrap_or_default();
        diff_list(node, &parent, old, new, &mut events);
    } else {
        diff_node(node, path, old, new, &mut events);
    }

    let mut derived = Vec::new();
    for kind in [EventKind::SubtreeChange, EventKind::SomehowChange] {
        for watched in registry.watched_paths(kind) {
            let depth = watched.split('/').filter(|s| !s.is_empty()).count();
            let mut seen: Vec<DataPath> = Vec::new();
            for event in events.iter().filter(|e| e.kind != EventKind::Leafref) {
                let len = event.data_path.len();
                if len < depth || (kind == EventKind::SubtreeChange && len == depth) {
                    continue;
                }
                let ancestor = event.data_path.prefix(depth);
                // a node that was itself created or deleted has no subtree change
                let replaced = kind == EventKind::SubtreeChange
                    && events.iter().any(|e| {
                        matches!(e.kind, EventKind::Create | EventKind::Delete) && e.data_path == ancestor
                    });
                if ancestor.schema_path() == watched && !replaced && !seen.contains(&ancestor) {
                    seen.push(ancestor);
                }
            }
            derived.extend(seen.into_iter().map(|p| ChangeEvent::new(kind, p)));
        }
    }
    events.extend(derived);
    Ok(events)
}

fn diff_node(
    node: &SchemaNode,
    path: &DataPath,
    old: Option<&Value>,
    new: Option<&Value>,
    out: &mut Vec<ChangeEvent>,
) {
    if !node.config {
        return;
    }
    let kind = match (old, new) {
        (None, None) => return,
        (Some(o), Some(n)) if o == n => return,
        (None, Some(_)) => EventKind::Create,
        (Some(_), None) => EventKind::Delete,
        (Some(_), Some(_)) => EventKind::Change,
    };
    let mut event = ChangeEvent::new(kind, path.clone());
    if let (Some(o), false) = (old, kind == EventKind::Create) {
        event = event.with_old(o.clone());
    }
    out.push(event);

    match &node.kind {
        NodeKind::Leaf(LeafType::Leafref(target)) | NodeKind::LeafList(LeafType::Leafref(target)) => {
            ref_events(target, path, &ref_values(old), &ref_values(new), out);
        }
        NodeKind::Container | NodeKind::List { .. } => diff_members(node, path, old, new, out),
        _ => {}
    }
}

fn diff_members(
    node: &SchemaNode,
    path: &DataPath,
    old: Option<&Value>,
    new: Option<&Value>,
    out: &mut Vec<ChangeEvent>,
) {
    for child in &node.children {
        let name = member_key(path.is_root(), child.name);
        let o = old.and_then(|v| v.get(&name));
        let n = new.and_then(|v| v.get(&name));
        if child.is_list() {
            diff_list(child, path, o, n, out);
        } else {
            diff_node(child, &path.child(child.name, None), o, n, out);
        }
    }
}

fn diff_list(
    node: &SchemaNode,
    parent: &DataPath,
    old: Option<&Value>,
    new: Option<&Value>,
    out: &mut Vec<ChangeEvent>,
) {
    let Some(key_leaf) = node.list_key() else {
        return;
    };
    let keyed = |list: Option<&Value>| -> Vec<(String, Value)> {
        list.and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|e| e.get(key_leaf).map(|k| (scalar_text(k), e.clone())))
            .collect()
    };
    let olds = keyed(old);
    let news = keyed(new);

    for (key, entry) in &news {
        let prev = olds.iter().find(|(k, _)| k == key).map(|(_, v)| v);
        diff_node(node, &parent.child(node.name, Some(key)), prev, Some(entry), out);
    }
    for (key, entry) in &olds {
        if !news.iter().any(|(k, _)| k == key) {
            diff_node(node, &parent.child(node.name, Some(key)), Some(entry), None, out);
        }
    }
}

fn ref_values(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(scalar_text).collect(),
        Some(v) => vec![scalar_text(v)],
        None => Vec::new(),
    }
}

/// Entry of the scope-relative list `rel` keyed by `key`, as seen from `referrer`
fn ref_target(referrer: &DataPath, rel: &str, key: &str) -> DataPath {
    let base = if referrer.tenant().is_some() {
        referrer.prefix(2)
    } else {
        DataPath::root()
    };
    let (dir, list) = rel.rsplit_once('/').unwrap_or(("", rel));
    base.join(dir).child(list, Some(key))
}

fn ref_events(target: &str, referrer: &DataPath, old: &[String], new: &[String], out: &mut Vec<ChangeEvent>) {
    for gone in old.iter().filter(|v| !new.contains(v)) {
        out.push(ChangeEvent::leafref(
            ref_target(referrer, target, gone),
            referrer.clone(),
            RefAction::Removed,
        ));
    }
    for added in new.iter().filter(|v| !old.contains(v)) {
        out.push(ChangeEvent::leafref(
            ref_target(referrer, target, added),
            referrer.clone(),
            RefAction::Added,
        ));
    }
}

/// Callbacks on leaves receive the object holding the leaf.
fn fire_events(
    schema: &Schema,
    tree: &mut Value,
    events: &[ChangeEvent],
    txn: &mut Transaction<'_>,
) -> Result<(), CallbackError> {
    for event in events {
        if !txn.registry.watches(event.kind, &event.schema_path) {
            continue;
        }
        let leafy = schema
            .find_schema_path(&event.schema_path)
            .is_some_and(SchemaNode::is_leafy);
        let node = if leafy {
            let parent = event.data_path.parent().unwrap_or_default();
            locate_mut(tree, schema, &parent)
        } else if event.kind == EventKind::Delete {
            None
        } else {
            locate_mut(tree, schema, &event.data_path)
        };
        txn.fire(event, node)?;
    }
    Ok(())
}
