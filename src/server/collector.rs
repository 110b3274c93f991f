//! Snapshot collection shared by Get and Subscribe.
//!
//! # Responsibilities
//! - Resolve requested paths against a tree root
//! - Serialize sub-trees to JSON blobs and leaves to typed values
//! - Apply the data-type filter to whole-tree dumps

use serde_json::{Map, Value};

use crate::server::error::ProtocolError;
use crate::tree::store::resolve;
use crate::tree::{Notification, Path, TypedValue, Update};

use serde::{Deserialize, Serialize};

/// Data-type filter applied to collected snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    #[default]
    All,
    Config,
    State,
    Operational,
}

impl DataType {
    /// The top-level element name this filter keeps, if any.
    fn element_name(&self) -> Option<&'static str> {
        match self {
            DataType::All => None,
            DataType::Config => Some("config"),
            DataType::State => Some("state"),
            DataType::Operational => Some("operational"),
        }
    }
}

/// Collect one notification for the requested paths.
///
/// With no paths, the whole tree under the prefix is dumped as one JSON
/// blob. Each resolved node becomes one update: leaf scalars as typed
/// values, sub-trees as JSON blobs.
pub fn collect(
    root: &Value,
    prefix: &Path,
    paths: &[Path],
    data_type: DataType,
) -> Result<Notification, ProtocolError> {
    let mut updates = Vec::new();

    if paths.is_empty() {
        let node = resolve(root, &prefix.elems)
            .ok_or_else(|| ProtocolError::NotFound(prefix.to_string()))?;
        let filtered = filter_top_level(node, prefix, data_type);
        updates.push(Update {
            path: "/".to_string(),
            value: node_value(&filtered, prefix)?,
        });
    } else {
        for path in paths {
            let full = prefix.join(path);
            if pruned_by_filter(&full, data_type) {
                return Err(ProtocolError::NotFound(full.to_string()));
            }
            let node = resolve(root, &full.elems)
                .ok_or_else(|| ProtocolError::NotFound(full.to_string()))?;
            updates.push(Update {
                path: path.to_string(),
                value: node_value(node, &full)?,
            });
        }
    }

    Ok(Notification::new(prefix.to_string(), updates))
}

/// A pathful request whose top-level element name does not match the
/// requested data type resolves to nothing.
fn pruned_by_filter(path: &Path, data_type: DataType) -> bool {
    match (data_type.element_name(), path.elems.first()) {
        (Some(name), Some(first)) => first.name != name,
        _ => false,
    }
}

/// Prune top-level branches of a dump that don't match the filter.
fn filter_top_level(node: &Value, prefix: &Path, data_type: DataType) -> Value {
    let Some(name) = data_type.element_name() else {
        return node.clone();
    };
    if !prefix.is_root() {
        // The filter applies at the top of the tree only.
        return node.clone();
    }
    match node {
        Value::Object(fields) => {
            let kept: Map<String, Value> = fields
                .iter()
                .filter(|(k, _)| k.as_str() == name)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(kept)
        }
        other => other.clone(),
    }
}

fn node_value(node: &Value, path: &Path) -> Result<TypedValue, ProtocolError> {
    TypedValue::from_node(node).ok_or_else(|| {
        ProtocolError::Internal(format!("unrecognized leaf kind at '{}'", path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        json!({
            "site": [
                {"site-id": "s1", "ip-domain": [{"ip-domain-id": "d1", "subnet": "10.0.0.0/24"}]}
            ],
            "config": {"poll-interval": 30}
        })
    }

    #[test]
    fn test_collect_leaf() {
        let tree = tree();
        let path = Path::parse("/site[site-id=s1]/ip-domain[ip-domain-id=d1]/subnet").unwrap();
        let notif = collect(&tree, &Path::root(), &[path], DataType::All).unwrap();
        assert_eq!(notif.updates.len(), 1);
        assert_eq!(
            notif.updates[0].value,
            TypedValue::String("10.0.0.0/24".to_string())
        );
    }

    #[test]
    fn test_collect_subtree_blob() {
        let tree = tree();
        let path = Path::parse("/site[site-id=s1]").unwrap();
        let notif = collect(&tree, &Path::root(), &[path], DataType::All).unwrap();
        match &notif.updates[0].value {
            TypedValue::Json(v) => assert_eq!(v["site-id"], json!("s1")),
            other => panic!("expected blob, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_whole_tree_dump() {
        let tree = tree();
        let notif = collect(&tree, &Path::root(), &[], DataType::All).unwrap();
        assert_eq!(notif.updates.len(), 1);
        assert_eq!(notif.updates[0].path, "/");
        match &notif.updates[0].value {
            TypedValue::Json(v) => {
                assert!(v.get("site").is_some());
                assert!(v.get("config").is_some());
            }
            other => panic!("expected blob, got {:?}", other),
        }
    }

    #[test]
    fn test_data_type_filter_prunes_dump() {
        let tree = tree();
        let notif = collect(&tree, &Path::root(), &[], DataType::Config).unwrap();
        match &notif.updates[0].value {
            TypedValue::Json(v) => {
                assert!(v.get("config").is_some());
                assert!(v.get("site").is_none());
            }
            other => panic!("expected blob, got {:?}", other),
        }
    }

    #[test]
    fn test_data_type_filter_prunes_path() {
        let tree = tree();
        let path = Path::parse("/site[site-id=s1]").unwrap();
        let err = collect(&tree, &Path::root(), &[path], DataType::Config).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_collect_missing_path() {
        let tree = tree();
        let path = Path::parse("/site[site-id=missing]").unwrap();
        let err = collect(&tree, &Path::root(), &[path], DataType::All).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_prefix_joins_paths() {
        let tree = tree();
        let prefix = Path::parse("/site[site-id=s1]").unwrap();
        let path = Path::parse("/ip-domain[ip-domain-id=d1]/subnet").unwrap();
        let notif = collect(&tree, &prefix, &[path], DataType::All).unwrap();
        assert_eq!(notif.prefix, "/site[site-id=s1]");
        assert_eq!(
            notif.updates[0].value,
            TypedValue::String("10.0.0.0/24".to_string())
        );
    }
}
