//! Path-based access into untyped Kubernetes objects.
//!
//! Manifests are kept as [`serde_json::Value`] trees so that unknown fields survive
//! a load/apply round trip. These helpers mirror the `NestedField` accessors
//! used by dynamic Kubernetes clients: a path is a list of mapping keys, and every
//! step reports whether the key was missing or the node had the wrong shape.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced by path lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
	#[error("field `{path}` not found")]
	NotFound { path: String },

	#[error("field `{path}` is a {found}, expected {expected}")]
	TypeMismatch {
		path: String,
		expected: &'static str,
		found: &'static str,
	},
}

fn type_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "sequence",
		Value::Object(_) => "mapping",
	}
}

fn joined(path: &[&str]) -> String {
	path.join(".")
}

/// Look up the node at `path`.
pub fn get<'v>(value: &'v Value, path: &[&str]) -> Result<&'v Value, PathError> {
	let mut current = value;
	for (depth, key) in path.iter().enumerate() {
		let map = current.as_object().ok_or_else(|| PathError::TypeMismatch {
			path: joined(&path[..depth]),
			expected: "mapping",
			found: type_name(current),
		})?;
		current = map.get(*key).ok_or_else(|| PathError::NotFound {
			path: joined(&path[..=depth]),
		})?;
	}
	Ok(current)
}

/// Look up a string at `path`.
pub fn get_str<'v>(value: &'v Value, path: &[&str]) -> Result<&'v str, PathError> {
	let node = get(value, path)?;
	node.as_str().ok_or_else(|| PathError::TypeMismatch {
		path: joined(path),
		expected: "string",
		found: type_name(node),
	})
}

/// Look up an optional string: a missing field yields `None`, a wrongly typed one is an error.
pub fn get_opt_str<'v>(value: &'v Value, path: &[&str]) -> Result<Option<&'v str>, PathError> {
	match get_str(value, path) {
		Ok(s) => Ok(Some(s)),
		Err(PathError::NotFound { .. }) => Ok(None),
		Err(e) => Err(e),
	}
}

/// Return the mapping at `path`, creating empty mappings along the way.
///
/// Intermediate nodes that exist but are not mappings are reported as a type mismatch
/// and left untouched.
pub fn ensure_map<'v>(
	value: &'v mut Value,
	path: &[&str],
) -> Result<&'v mut Map<String, Value>, PathError> {
	let mut current = value;
	for (depth, key) in path.iter().enumerate() {
		let found = type_name(current);
		let map = current
			.as_object_mut()
			.ok_or_else(|| PathError::TypeMismatch {
				path: joined(&path[..depth]),
				expected: "mapping",
				found,
			})?;
		current = map
			.entry((*key).to_string())
			.or_insert_with(|| Value::Object(Map::new()));
	}
	let found = type_name(current);
	current.as_object_mut().ok_or(PathError::TypeMismatch {
		path: joined(path),
		expected: "mapping",
		found,
	})
}

/// Set `path` to `new`, creating parent mappings as needed.
pub fn set(value: &mut Value, path: &[&str], new: Value) -> Result<(), PathError> {
	let Some((last, parents)) = path.split_last() else {
		*value = new;
		return Ok(());
	};
	let parent = ensure_map(value, parents)?;
	parent.insert((*last).to_string(), new);
	Ok(())
}

/// Append `item` to the sequence at `path`, creating it when absent.
pub fn push(value: &mut Value, path: &[&str], item: Value) -> Result<(), PathError> {
	let Some((last, parents)) = path.split_last() else {
		return Err(PathError::TypeMismatch {
			path: String::new(),
			expected: "sequence",
			found: type_name(value),
		});
	};
	let parent = ensure_map(value, parents)?;
	let slot = parent
		.entry((*last).to_string())
		.or_insert_with(|| Value::Array(Vec::new()));
	if slot.is_null() {
		*slot = Value::Array(Vec::new());
	}
	let found = type_name(slot);
	let seq = slot.as_array_mut().ok_or_else(|| PathError::TypeMismatch {
		path: joined(path),
		expected: "sequence",
		found,
	})?;
	seq.push(item);
	Ok(())
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_get_nested() {
		let obj = json!({"metadata": {"name": "webhook", "labels": {"app": "cert-manager"}}});
		assert_eq!(get_str(&obj, &["metadata", "name"]).unwrap(), "webhook");
		assert_eq!(
			get_str(&obj, &["metadata", "labels", "app"]).unwrap(),
			"cert-manager"
		);
	}

	#[test]
	fn test_get_missing_reports_full_path() {
		let obj = json!({"metadata": {}});
		assert_eq!(
			get(&obj, &["metadata", "namespace"]),
			Err(PathError::NotFound {
				path: "metadata.namespace".into()
			})
		);
		assert_eq!(get_opt_str(&obj, &["metadata", "namespace"]), Ok(None));
	}

	#[test]
	fn test_get_through_scalar_is_mismatch() {
		let obj = json!({"metadata": "oops"});
		assert_matches!(
			get(&obj, &["metadata", "name"]),
			Err(PathError::TypeMismatch { path, expected: "mapping", found: "string" }) if path == "metadata"
		);
	}

	#[test]
	fn test_set_creates_parents_and_keeps_siblings() {
		let mut obj = json!({"kind": "Role", "metadata": {"name": "r", "x-unknown": 1}});
		set(&mut obj, &["metadata", "annotations", "a"], json!("b")).unwrap();
		assert_eq!(
			obj,
			json!({"kind": "Role", "metadata": {"name": "r", "x-unknown": 1, "annotations": {"a": "b"}}})
		);
	}

	#[test]
	fn test_push_appends() {
		let mut obj = json!({"metadata": {"ownerReferences": [{"name": "a"}]}});
		push(&mut obj, &["metadata", "ownerReferences"], json!({"name": "b"})).unwrap();
		assert_eq!(
			obj["metadata"]["ownerReferences"],
			json!([{"name": "a"}, {"name": "b"}])
		);
	}

	#[test]
	fn test_push_into_null_creates_sequence() {
		let mut obj = json!({"metadata": {"ownerReferences": null}});
		push(&mut obj, &["metadata", "ownerReferences"], json!(1)).unwrap();
		assert_eq!(obj["metadata"]["ownerReferences"], json!([1]));
	}

	#[test]
	fn test_push_into_mapping_fails() {
		let mut obj = json!({"metadata": {"ownerReferences": {}}});
		assert_matches!(
			push(&mut obj, &["metadata", "ownerReferences"], json!(1)),
			Err(PathError::TypeMismatch { expected: "sequence", .. })
		);
	}
}
