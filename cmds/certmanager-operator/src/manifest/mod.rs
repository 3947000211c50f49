//! Loading of the bundled manifests.
//!
//! Every bundle of the [`ManifestStore`] is split into YAML documents, and every
//! document is decoded into a [`ManagedObject`]. Loading is all-or-nothing: the first
//! malformed document aborts it.

pub mod split;
pub mod store;

use std::sync::Arc;

use k8s_openapi::{
	api::{
		admissionregistration::v1::{
			MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
		},
		apps::v1::Deployment,
		core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount},
		rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
	},
	apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
	kube_aggregator::pkg::apis::apiregistration::v1::APIService,
};
use kube::core::GroupVersionKind;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use self::{split::split_documents, store::ManifestStore};
use crate::value::{self, PathError};

/// Errors produced while loading manifests.
#[derive(Debug, Error)]
pub enum LoadError {
	#[error("manifest bundle `{bundle}` is listed but has no content")]
	MissingBundle { bundle: String },

	#[error("decoding document {index} of `{bundle}` at byte {offset}")]
	Decode {
		bundle: String,
		index: usize,
		offset: usize,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},

	#[error("document {index} of `{bundle}` at byte {offset} is not a mapping")]
	NotAnObject {
		bundle: String,
		index: usize,
		offset: usize,
	},

	#[error("document {index} of `{bundle}` at byte {offset} is not a valid object")]
	InvalidObject {
		bundle: String,
		index: usize,
		offset: usize,
		#[source]
		source: PathError,
	},

	#[error("document {index} of `{bundle}` at byte {offset} has an empty metadata.name")]
	EmptyName {
		bundle: String,
		index: usize,
		offset: usize,
	},

	#[error("decoding {kind} from document {index} of `{bundle}` at byte {offset}")]
	Typed {
		bundle: String,
		index: usize,
		offset: usize,
		kind: String,
		#[source]
		source: serde_json::Error,
	},
}

/// Strongly typed form of the kinds the bundles are known to contain.
#[derive(Debug, Clone)]
pub enum TypedObject {
	Namespace(Box<Namespace>),
	ServiceAccount(Box<ServiceAccount>),
	ConfigMap(Box<ConfigMap>),
	Secret(Box<Secret>),
	Service(Box<Service>),
	Deployment(Box<Deployment>),
	Role(Box<Role>),
	RoleBinding(Box<RoleBinding>),
	ClusterRole(Box<ClusterRole>),
	ClusterRoleBinding(Box<ClusterRoleBinding>),
	CustomResourceDefinition(Box<CustomResourceDefinition>),
	ApiService(Box<APIService>),
	MutatingWebhookConfiguration(Box<MutatingWebhookConfiguration>),
	ValidatingWebhookConfiguration(Box<ValidatingWebhookConfiguration>),
}

fn typed<T: DeserializeOwned>(
	attributes: &Value,
	wrap: fn(Box<T>) -> TypedObject,
) -> Result<TypedObject, serde_json::Error> {
	T::deserialize(attributes).map(|t| wrap(Box::new(t)))
}

impl TypedObject {
	/// Decode `attributes` when `gvk` is a known kind; `Ok(None)` for anything else.
	pub fn decode(
		gvk: &GroupVersionKind,
		attributes: &Value,
	) -> Result<Option<Self>, serde_json::Error> {
		let decoded = match (gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()) {
			("", "v1", "Namespace") => typed(attributes, Self::Namespace)?,
			("", "v1", "ServiceAccount") => typed(attributes, Self::ServiceAccount)?,
			("", "v1", "ConfigMap") => typed(attributes, Self::ConfigMap)?,
			("", "v1", "Secret") => typed(attributes, Self::Secret)?,
			("", "v1", "Service") => typed(attributes, Self::Service)?,
			("apps", "v1", "Deployment") => typed(attributes, Self::Deployment)?,
			("rbac.authorization.k8s.io", "v1", "Role") => typed(attributes, Self::Role)?,
			("rbac.authorization.k8s.io", "v1", "RoleBinding") => {
				typed(attributes, Self::RoleBinding)?
			}
			("rbac.authorization.k8s.io", "v1", "ClusterRole") => {
				typed(attributes, Self::ClusterRole)?
			}
			("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding") => {
				typed(attributes, Self::ClusterRoleBinding)?
			}
			("apiextensions.k8s.io", "v1", "CustomResourceDefinition") => {
				typed(attributes, Self::CustomResourceDefinition)?
			}
			("apiregistration.k8s.io", "v1", "APIService") => {
				typed(attributes, Self::ApiService)?
			}
			("admissionregistration.k8s.io", "v1", "MutatingWebhookConfiguration") => {
				typed(attributes, Self::MutatingWebhookConfiguration)?
			}
			("admissionregistration.k8s.io", "v1", "ValidatingWebhookConfiguration") => {
				typed(attributes, Self::ValidatingWebhookConfiguration)?
			}
			_ => return Ok(None),
		};
		Ok(Some(decoded))
	}
}

/// One manifest of the bundle, held for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ManagedObject {
	/// The YAML document the object was decoded from.
	pub raw: Arc<[u8]>,
	pub typed: Option<Arc<TypedObject>>,
	/// Generic form; the only one the apply path reads or writes.
	pub attributes: Value,
	pub name: String,
	/// Empty for cluster-scoped objects.
	pub namespace: String,
	pub group: String,
	pub version: String,
	pub kind: String,
}

impl ManagedObject {
	pub fn gvk(&self) -> GroupVersionKind {
		GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
	}

	/// `namespace/name`, or just `name` for cluster-scoped objects.
	pub fn display_name(&self) -> String {
		if self.namespace.is_empty() {
			self.name.clone()
		} else {
			format!("{}/{}", self.namespace, self.name)
		}
	}
}

/// Split an `apiVersion` into group and version; the core group is empty.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
	api_version.split_once('/').unwrap_or(("", api_version))
}

/// Reads every bundle of a store into [`ManagedObject`]s.
pub struct ManifestLoader {
	store: Arc<dyn ManifestStore>,
}

impl ManifestLoader {
	pub fn new(store: Arc<dyn ManifestStore>) -> Self {
		Self { store }
	}

	/// Load all objects, in bundle order and document order within a bundle.
	#[instrument(skip(self))]
	pub fn load_objects(&self) -> Result<Vec<ManagedObject>, LoadError> {
		let mut objects = Vec::new();

		for bundle in self.store.names() {
			tracing::info!(manifest = %bundle, "loading");
			let data = self
				.store
				.get(&bundle)
				.ok_or_else(|| LoadError::MissingBundle {
					bundle: bundle.clone(),
				})?;

			let documents = split_documents(&data)
				.into_iter()
				.filter(|doc| !split::is_blank(doc.bytes));
			for (index, doc) in documents.enumerate() {
				let object = decode_document(&bundle, index, doc.offset, doc.bytes)?;
				tracing::debug!(
					kind = %object.kind,
					object = %object.display_name(),
					"decoded manifest"
				);
				objects.push(object);
			}
		}

		Ok(objects)
	}
}

fn decode_document(
	bundle: &str,
	index: usize,
	offset: usize,
	raw: &[u8],
) -> Result<ManagedObject, LoadError> {
	let attributes: Value =
		serde_yaml_with_quirks::from_slice(raw).map_err(|source| LoadError::Decode {
			bundle: bundle.to_string(),
			index,
			offset,
			source,
		})?;

	if !attributes.is_object() {
		return Err(LoadError::NotAnObject {
			bundle: bundle.to_string(),
			index,
			offset,
		});
	}

	let invalid = |source| LoadError::InvalidObject {
		bundle: bundle.to_string(),
		index,
		offset,
		source,
	};
	let api_version = value::get_str(&attributes, &["apiVersion"]).map_err(invalid)?;
	let kind = value::get_str(&attributes, &["kind"]).map_err(invalid)?;
	let name = value::get_str(&attributes, &["metadata", "name"]).map_err(invalid)?;
	let namespace = value::get_opt_str(&attributes, &["metadata", "namespace"])
		.map_err(invalid)?
		.unwrap_or_default();

	if name.is_empty() {
		return Err(LoadError::EmptyName {
			bundle: bundle.to_string(),
			index,
			offset,
		});
	}

	let (group, version) = split_api_version(api_version);
	let gvk = GroupVersionKind::gvk(group, version, kind);
	let typed = TypedObject::decode(&gvk, &attributes).map_err(|source| LoadError::Typed {
		bundle: bundle.to_string(),
		index,
		offset,
		kind: kind.to_string(),
		source,
	})?;

	Ok(ManagedObject {
		raw: Arc::from(raw),
		typed: typed.map(Arc::new),
		name: name.to_string(),
		namespace: namespace.to_string(),
		group: gvk.group,
		version: gvk.version,
		kind: gvk.kind,
		attributes,
	})
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;

	use super::{store::StaticStore, *};

	fn load(bundles: &'static [(&'static str, &'static [u8])]) -> Result<Vec<ManagedObject>, LoadError> {
		ManifestLoader::new(Arc::new(StaticStore::new(bundles))).load_objects()
	}

	const NS_AND_ROLE: &[u8] = indoc! {b"
		apiVersion: v1
		kind: Namespace
		metadata:
		  name: cert-manager
		---
		apiVersion: rbac.authorization.k8s.io/v1
		kind: Role
		metadata:
		  name: leader-election
		  namespace: cert-manager
		  x-custom: kept
		rules: []
	"};

	#[test]
	fn test_load_identity_fields() {
		let objects = load(&[("bundle.yaml", NS_AND_ROLE)]).unwrap();
		assert_eq!(objects.len(), 2);

		let ns = &objects[0];
		assert_eq!(ns.kind, "Namespace");
		assert_eq!(ns.group, "");
		assert_eq!(ns.version, "v1");
		assert_eq!(ns.name, "cert-manager");
		assert_eq!(ns.namespace, "");
		assert_matches!(ns.typed.as_deref(), Some(TypedObject::Namespace(_)));

		let role = &objects[1];
		assert_eq!(role.group, "rbac.authorization.k8s.io");
		assert_eq!(role.display_name(), "cert-manager/leader-election");
		assert_eq!(role.attributes["metadata"]["x-custom"], "kept");
		assert_matches!(role.typed.as_deref(), Some(TypedObject::Role(_)));
	}

	#[test]
	fn test_raw_decodes_to_attributes() {
		let objects = load(&[("bundle.yaml", NS_AND_ROLE)]).unwrap();
		for object in objects {
			let reparsed: Value = serde_yaml_with_quirks::from_slice(&object.raw).unwrap();
			assert_eq!(reparsed, object.attributes);
		}
	}

	#[test]
	fn test_bundle_order_is_sorted_by_name() {
		let objects = load(&[
			("20-second.yaml", b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: second\n"),
			("10-first.yaml", b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: first\n"),
		])
		.unwrap();
		let names: Vec<_> = objects.iter().map(|o| o.name.as_str()).collect();
		assert_eq!(names, vec!["first", "second"]);
	}

	#[test]
	fn test_unknown_kind_has_no_typed_form() {
		let objects = load(&[(
			"issuer.yaml",
			b"apiVersion: cert-manager.io/v1\nkind: ClusterIssuer\nmetadata:\n  name: selfsigned\nspec:\n  selfSigned: {}\n",
		)])
		.unwrap();
		assert!(objects[0].typed.is_none());
		assert_eq!(objects[0].attributes["spec"]["selfSigned"], serde_json::json!({}));
	}

	#[test]
	fn test_blank_documents_skipped() {
		let objects = load(&[(
			"bundle.yaml",
			b"# leading comment\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: a\n---\n\n---\n",
		)])
		.unwrap();
		assert_eq!(objects.len(), 1);
	}

	#[test]
	fn test_empty_leading_template_skipped() {
		let objects = load(&[(
			"rendered.yaml",
			indoc! {b"
				---
				# Source: cert-manager/templates/empty.yaml
				---
				# Source: cert-manager/templates/namespace.yaml
				apiVersion: v1
				kind: Namespace
				metadata:
				  name: cert-manager
			"},
		)])
		.unwrap();
		assert_eq!(objects.len(), 1);
		assert_eq!(objects[0].name, "cert-manager");
	}

	#[test]
	fn test_malformed_document_aborts() {
		let err = load(&[
			("a.yaml", NS_AND_ROLE),
			("b.yaml", b"apiVersion: v1\nkind: Namespace\nmetadata:\n  name: ok\n---\nkind: [unclosed\n"),
		])
		.unwrap_err();
		assert_matches!(
			err,
			LoadError::Decode { bundle, index: 1, offset: 56, .. } if bundle == "b.yaml"
		);
	}

	#[test]
	fn test_scalar_document_rejected() {
		let err = load(&[("a.yaml", b"just a string\n")]).unwrap_err();
		assert_matches!(err, LoadError::NotAnObject { index: 0, offset: 0, .. });
	}

	#[test]
	fn test_missing_kind_rejected() {
		let err = load(&[("a.yaml", b"apiVersion: v1\nmetadata:\n  name: x\n")]).unwrap_err();
		assert_matches!(
			err,
			LoadError::InvalidObject { source: PathError::NotFound { path }, .. } if path == "kind"
		);
	}

	#[test]
	fn test_empty_name_rejected() {
		let err = load(&[("a.yaml", b"apiVersion: v1\nkind: Namespace\nmetadata:\n  name: ''\n")])
			.unwrap_err();
		assert_matches!(err, LoadError::EmptyName { .. });
	}
}
