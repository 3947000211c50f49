//! Helper functions for mock Kubernetes testing.

use wiremock::ResponseTemplate;

/// Deep merge two JSON values (patch into base).
///
/// Mappings merge key by key; any other value in `patch` (including sequences)
/// replaces the base value, which is how server-side apply treats atomic lists.
pub fn merge_json(base: serde_json::Value, patch: serde_json::Value) -> serde_json::Value {
	match (base, patch) {
		(serde_json::Value::Object(mut base_map), serde_json::Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				let base_value = base_map.remove(&key).unwrap_or(serde_json::Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			serde_json::Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}

/// A `Status` failure response as returned by the API server.
pub fn status_response(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}
