//! The config tree store.
//!
//! # Responsibilities
//! - Own the one mutable config tree per server instance
//! - Guard it with a single read-write lock
//! - Resolve structured paths to nodes
//! - Apply updates and deletes in place
//!
//! # Design Decisions
//! - The tree is a JSON document; list elements are arrays of objects
//!   addressed by their key fields
//! - Readers clone sub-trees out; the lock is released before any
//!   downstream call

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::tree::path::PathElem;
use crate::tree::value::TypedValue;

/// Error applying a mutation to the tree.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("initial payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("cannot descend into non-object node at '{0}'")]
    NotAnObject(String),

    #[error("list element '{0}' addressed without key selectors")]
    MissingKeys(String),

    #[error("update value for keyed element '{0}' must be a JSON object")]
    NotMergeable(String),
}

/// In-memory, lock-guarded config tree.
pub struct TreeStore {
    tree: RwLock<Value>,
}

impl TreeStore {
    /// Create a store from an optional initial JSON payload.
    pub fn new(initial: Option<&[u8]>) -> Result<Self, TreeError> {
        let tree = match initial {
            Some(bytes) => serde_json::from_slice(bytes)?,
            None => Value::Object(Map::new()),
        };
        Ok(Self {
            tree: RwLock::new(tree),
        })
    }

    /// Acquire the read lock. Concurrent readers are allowed.
    pub async fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.tree.read().await
    }

    /// Acquire the exclusive write lock.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.tree.write().await
    }

    /// Deep copy of the current tree, taken under the read lock.
    pub async fn snapshot(&self) -> Value {
        self.tree.read().await.clone()
    }
}

/// Resolve a path against a tree root, returning the addressed node.
pub fn resolve<'a>(root: &'a Value, elems: &[PathElem]) -> Option<&'a Value> {
    let mut current = root;
    for elem in elems {
        let member = current.as_object()?.get(&elem.name)?;
        current = if elem.keys.is_empty() {
            member
        } else {
            find_list_entry(member.as_array()?, elem)?
        };
    }
    Some(current)
}

/// Apply one update, creating intermediate nodes as needed.
pub fn apply_update(
    root: &mut Value,
    elems: &[PathElem],
    value: &TypedValue,
) -> Result<(), TreeError> {
    if elems.is_empty() {
        // Whole-tree replacement.
        match value {
            TypedValue::Json(v) if v.is_object() => {
                *root = v.clone();
                return Ok(());
            }
            _ => return Err(TreeError::NotMergeable("/".to_string())),
        }
    }

    let (last, parents) = elems.split_last().expect("non-empty");
    let parent = descend_mut(root, parents, true)?;

    let obj = parent
        .as_object_mut()
        .ok_or_else(|| TreeError::NotAnObject(last.name.clone()))?;

    if last.keys.is_empty() {
        obj.insert(last.name.clone(), value.to_node());
        return Ok(());
    }

    // Keyed final element: merge an object payload into the matching list
    // entry, inserting a new entry when none matches.
    let member = obj
        .entry(last.name.clone())
        .or_insert_with(|| Value::Array(Vec::new()));
    let arr = member
        .as_array_mut()
        .ok_or_else(|| TreeError::NotAnObject(last.name.clone()))?;
    let entry = match arr.iter_mut().position(|e| entry_matches(e, last)) {
        Some(idx) => &mut arr[idx],
        None => {
            let mut fresh = Map::new();
            for (k, v) in &last.keys {
                fresh.insert(k.clone(), Value::String(v.clone()));
            }
            arr.push(Value::Object(fresh));
            arr.last_mut().expect("just pushed")
        }
    };
    match value {
        TypedValue::Json(Value::Object(fields)) => {
            let target = entry
                .as_object_mut()
                .ok_or_else(|| TreeError::NotAnObject(last.name.clone()))?;
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
            Ok(())
        }
        _ => Err(TreeError::NotMergeable(last.name.clone())),
    }
}

/// Delete the node at a path. Returns false when nothing was there.
pub fn apply_delete(root: &mut Value, elems: &[PathElem]) -> bool {
    let Some((last, parents)) = elems.split_last() else {
        *root = Value::Object(Map::new());
        return true;
    };
    let Ok(parent) = descend_mut(root, parents, false) else {
        return false;
    };
    let Some(obj) = parent.as_object_mut() else {
        return false;
    };
    if last.keys.is_empty() {
        return obj.remove(&last.name).is_some();
    }
    let Some(arr) = obj.get_mut(&last.name).and_then(Value::as_array_mut) else {
        return false;
    };
    match arr.iter().position(|e| entry_matches(e, last)) {
        Some(idx) => {
            arr.remove(idx);
            true
        }
        None => false,
    }
}

fn descend_mut<'a>(
    root: &'a mut Value,
    elems: &[PathElem],
    create: bool,
) -> Result<&'a mut Value, TreeError> {
    let mut current = root;
    for elem in elems {
        let obj = current
            .as_object_mut()
            .ok_or_else(|| TreeError::NotAnObject(elem.name.clone()))?;
        if !obj.contains_key(&elem.name) {
            if !create {
                return Err(TreeError::NotAnObject(elem.name.clone()));
            }
            let fresh = if elem.keys.is_empty() {
                Value::Object(Map::new())
            } else {
                Value::Array(Vec::new())
            };
            obj.insert(elem.name.clone(), fresh);
        }
        let member = obj.get_mut(&elem.name).expect("just ensured");
        current = if elem.keys.is_empty() {
            member
        } else {
            let arr = member
                .as_array_mut()
                .ok_or_else(|| TreeError::MissingKeys(elem.name.clone()))?;
            let idx = match arr.iter().position(|e| entry_matches(e, elem)) {
                Some(idx) => idx,
                None if create => {
                    let mut fresh = Map::new();
                    for (k, v) in &elem.keys {
                        fresh.insert(k.clone(), Value::String(v.clone()));
                    }
                    arr.push(Value::Object(fresh));
                    arr.len() - 1
                }
                None => return Err(TreeError::NotAnObject(elem.name.clone())),
            };
            &mut arr[idx]
        };
    }
    Ok(current)
}

/// First list entry matching an element's key selectors.
fn find_list_entry<'a>(arr: &'a [Value], elem: &PathElem) -> Option<&'a Value> {
    arr.iter().find(|entry| entry_matches(entry, elem))
}

/// A list entry matches when every key selector equals the entry's field,
/// compared through the field's string form.
fn entry_matches(entry: &Value, elem: &PathElem) -> bool {
    let Some(obj) = entry.as_object() else {
        return false;
    };
    elem.keys.iter().all(|(k, want)| {
        obj.get(k).is_some_and(|v| match v {
            Value::String(s) => s == want,
            Value::Number(n) => n.to_string() == *want,
            Value::Bool(b) => b.to_string() == *want,
            _ => false,
        })
    })
}
