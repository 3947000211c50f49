//! HTTP mock of the Kubernetes API server, built on wiremock.
//!
//! Serves `/version`, discovery for the configured [`MockDiscovery`], and single
//! objects under `/api` and `/apis`. Objects are kept in memory keyed by their
//! collection path and name: GET reads them, PATCH merges into them and POST
//! creates them. Individual objects can be made to fail on read or write.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::{merge_json, status_response},
};

/// Objects keyed by (collection path, name).
type ObjectStore = Arc<RwLock<HashMap<(String, String), Value>>>;

const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
	"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

const OBJECT_PATH: &str = r"^/apis?/.+";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// API resources advertised by discovery.
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects present when the server starts. Their paths are derived from
	/// apiVersion/kind through the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// Object names whose PATCH and POST requests fail with 409 Conflict.
	#[builder(default)]
	reject_writes: Vec<String>,
	/// Object names whose PATCH and POST requests fail with 404, as when the
	/// endpoint serving them has been removed.
	#[builder(default)]
	unserved_writes: Vec<String>,
	/// Object names whose GET requests fail with 500.
	#[builder(default)]
	fail_reads: Vec<String>,
}

/// A request the mock server received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
	pub method: String,
	pub path: String,
	pub query: String,
}

impl RecordedRequest {
	pub fn is_write(&self) -> bool {
		matches!(self.method.as_str(), "PATCH" | "POST" | "PUT" | "DELETE")
	}
}

/// Per-object failure injection.
struct Failures {
	reject_writes: Vec<String>,
	unserved_writes: Vec<String>,
	fail_reads: Vec<String>,
}

impl Failures {
	fn on_write(&self, name: &str) -> Option<ResponseTemplate> {
		if self.reject_writes.iter().any(|n| n == name) {
			return Some(status_response(409, "Conflict", "write rejected by mock"));
		}
		if self.unserved_writes.iter().any(|n| n == name) {
			return Some(status_response(404, "NotFound", "the server could not find the requested resource"));
		}
		None
	}

	fn on_read(&self, name: &str) -> Option<ResponseTemplate> {
		self.fail_reads
			.iter()
			.any(|n| n == name)
			.then(|| status_response(500, "InternalError", "read failed in mock"))
	}
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	objects: ObjectStore,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut objects = HashMap::new();
		for manifest in self.resources {
			if let Some(key) = object_key(&manifest, &self.discovery) {
				trace!(collection = %key.0, name = %key.1, "Registered resource");
				objects.insert(key, manifest);
			}
		}
		let objects = Arc::new(RwLock::new(objects));
		let failures = Arc::new(Failures {
			reject_writes: self.reject_writes,
			unserved_writes: self.unserved_writes,
			fail_reads: self.fail_reads,
		});

		mount_version(&server).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_objects(&server, &objects, &failures).await;

		RunningHttpMockK8sServer { server, objects }
	}
}

/// Collection path and name a manifest is stored under.
fn object_key(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let metadata = manifest.get("metadata")?;
	let name = metadata.get("name")?.as_str()?;
	let resource = discovery.find(api_version, kind)?;

	let root = if api_version.contains('/') { "apis" } else { "api" };
	let collection = if resource.namespaced {
		let namespace = metadata
			.get("namespace")
			.and_then(Value::as_str)
			.unwrap_or("default");
		format!("/{root}/{api_version}/namespaces/{namespace}/{}", resource.name)
	} else {
		format!("/{root}/{api_version}/{}", resource.name)
	};
	Some((collection, name.to_string()))
}

/// Split `/…/collection/name` into its collection path and name.
fn split_object_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((collection, name)) => (collection.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Every request received so far, in arrival order.
	pub async fn requests(&self) -> Vec<RecordedRequest> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.map(|req| RecordedRequest {
				method: req.method.to_string(),
				path: req.url.path().to_string(),
				query: req.url.query().unwrap_or("").to_string(),
			})
			.collect()
	}

	/// Write requests (PATCH, POST, PUT, DELETE) received so far.
	pub async fn writes(&self) -> Vec<RecordedRequest> {
		self.requests()
			.await
			.into_iter()
			.filter(RecordedRequest::is_write)
			.collect()
	}

	/// Current stored state of `name` under the collection path `collection`
	/// (e.g. `/api/v1/namespaces`).
	pub fn resource(&self, collection: &str, name: &str) -> Option<Value> {
		self.objects
			.read()
			.unwrap()
			.get(&(collection.to_string(), name.to_string()))
			.cloned()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": "28",
			"gitVersion": "v1.28.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn scope(resource: &MockApiResource) -> &'static str {
	if resource.namespaced {
		"Namespaced"
	} else {
		"Cluster"
	}
}

/// One `APIGroupDiscovery` entry holding a single version.
fn aggregated_group(group: &str, version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"resource": r.name,
				"responseKind": {"group": group, "version": version, "kind": r.kind},
				"scope": scope(r),
				"verbs": r.verbs,
			})
		})
		.collect();
	json!({
		"metadata": {"name": group},
		"versions": [{"version": version, "resources": resources, "freshness": "Current"}]
	})
}

/// An `APIResourceList` for one group version.
fn resource_list(group_version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"name": r.name,
				"singularName": "",
				"namespaced": r.namespaced,
				"kind": r.kind,
				"verbs": r.verbs,
			})
		})
		.collect();
	json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

fn discovery_list(items: Vec<Value>) -> String {
	json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": items
	})
	.to_string()
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// Aggregated requests carry an `apidiscovery` Accept header and are mounted
	// first so they win over the legacy handlers for the same paths.
	for (root, body) in [
		(
			"/api",
			discovery_list(vec![aggregated_group("", "v1", &discovery.core_resources)]),
		),
		(
			"/apis",
			discovery_list(
				discovery
					.group_resources
					.iter()
					.map(|(gv, rs)| {
						let (group, version) = gv.split_once('/').unwrap_or(("", gv));
						aggregated_group(group, version, rs)
					})
					.collect(),
			),
		),
	] {
		let response = match mode {
			// set_body_json would overwrite the content type kube needs to see
			DiscoveryMode::Aggregated => {
				ResponseTemplate::new(200).set_body_raw(body, AGGREGATED_DISCOVERY_CONTENT_TYPE)
			}
			DiscoveryMode::Legacy => ResponseTemplate::new(406),
		};
		Mock::given(method("GET"))
			.and(path(root))
			.and(header_regex("accept", "apidiscovery"))
			.respond_with(response)
			.mount(server)
			.await;
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();
	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(resource_list("v1", &discovery.core_resources)),
		)
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(resource_list(gv, rs)))
			.mount(server)
			.await;
	}
}

async fn mount_objects(server: &MockServer, objects: &ObjectStore, failures: &Arc<Failures>) {
	let (store, fail) = (Arc::clone(objects), Arc::clone(failures));
	Mock::given(method("GET"))
		.and(path_regex(OBJECT_PATH))
		.respond_with(move |req: &Request| {
			let key = split_object_path(req.url.path());
			if let Some(response) = fail.on_read(&key.1) {
				return response;
			}
			match store.read().unwrap().get(&key) {
				Some(object) => ResponseTemplate::new(200).set_body_json(object),
				None => status_response(404, "NotFound", "not found"),
			}
		})
		.mount(server)
		.await;

	// Server-side apply: merge into the stored object, creating it when absent.
	let (store, fail) = (Arc::clone(objects), Arc::clone(failures));
	Mock::given(method("PATCH"))
		.and(path_regex(OBJECT_PATH))
		.respond_with(move |req: &Request| {
			let key = split_object_path(req.url.path());
			if let Some(response) = fail.on_write(&key.1) {
				return response;
			}
			let patch: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
			let mut objects = store.write().unwrap();
			let merged = match objects.remove(&key) {
				Some(existing) => merge_json(existing, patch),
				None => patch,
			};
			objects.insert(key, merged.clone());
			ResponseTemplate::new(200).set_body_json(merged)
		})
		.mount(server)
		.await;

	let (store, fail) = (Arc::clone(objects), Arc::clone(failures));
	Mock::given(method("POST"))
		.and(path_regex(OBJECT_PATH))
		.respond_with(move |req: &Request| {
			let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
			let name = body
				.pointer("/metadata/name")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			if let Some(response) = fail.on_write(&name) {
				return response;
			}
			let key = (req.url.path().to_string(), name);
			let mut objects = store.write().unwrap();
			if objects.contains_key(&key) {
				return status_response(409, "AlreadyExists", "already exists");
			}
			objects.insert(key, body.clone());
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;
}
