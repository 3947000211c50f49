//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default, Debug)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Pre-configured discovery responses.
///
/// Group resources are keyed by `group/version`.
#[derive(Clone, Debug)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
					],
				),
				(
					"rbac.authorization.k8s.io/v1".to_string(),
					vec![
						MockApiResource::namespaced("roles", "Role"),
						MockApiResource::namespaced("rolebindings", "RoleBinding"),
						MockApiResource::cluster_scoped("clusterroles", "ClusterRole"),
						MockApiResource::cluster_scoped(
							"clusterrolebindings",
							"ClusterRoleBinding",
						),
					],
				),
				(
					"apiregistration.k8s.io/v1".to_string(),
					vec![MockApiResource::cluster_scoped("apiservices", "APIService")],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Serve an additional resource under `group_version` (e.g. a custom resource).
	pub fn with_resource(mut self, group_version: &str, resource: MockApiResource) -> Self {
		self.group_resources
			.entry(group_version.to_string())
			.or_default()
			.push(resource);
		self
	}

	/// Look up the resource serving `kind` under `api_version`.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		if api_version.contains('/') {
			self.group_resources
				.get(api_version)?
				.iter()
				.find(|r| r.kind == kind)
		} else {
			self.core_resources.iter().find(|r| r.kind == kind)
		}
	}
}

/// A mock API resource definition.
#[derive(Clone, Debug)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: ["create", "delete", "get", "list", "patch", "update", "watch"]
				.map(String::from)
				.to_vec(),
		}
	}

	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_find_core_and_group() {
		let discovery = MockDiscovery::default();
		assert_eq!(discovery.find("v1", "Namespace").unwrap().name, "namespaces");
		assert_eq!(
			discovery
				.find("apiregistration.k8s.io/v1", "APIService")
				.unwrap()
				.name,
			"apiservices"
		);
		assert!(discovery.find("example.com/v1", "Widget").is_none());
	}

	#[test]
	fn test_with_resource() {
		let discovery = MockDiscovery::default().with_resource(
			"example.com/v1",
			MockApiResource::namespaced("widgets", "Widget"),
		);
		let widget = discovery.find("example.com/v1", "Widget").unwrap();
		assert!(widget.namespaced);
	}
}
