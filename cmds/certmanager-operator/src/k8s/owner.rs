//! Owner reference injection.
//!
//! Objects applied on behalf of a custom resource carry a controller owner
//! reference to it, so deleting the custom resource lets the garbage collector
//! remove everything that was applied for it.

use std::collections::HashMap;

use kube::{core::GroupVersionKind, Resource};
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use crate::{
	manifest::ManagedObject,
	value::{self, PathError},
};

/// Errors raised while resolving or writing owner references.
#[derive(Debug, Error)]
pub enum SchemeError {
	#[error("kind {0} is not registered in the scheme")]
	UnregisteredKind(String),

	#[error("cannot write owner references into {object}")]
	Metadata {
		object: String,
		#[source]
		source: PathError,
	},
}

/// Identity of an object that can own applied manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwningResource {
	pub name: String,
	pub namespace: Option<String>,
	pub uid: String,
	pub kind: String,
}

impl OwningResource {
	pub fn from_resource<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
		let meta = obj.meta();
		Self {
			name: meta.name.clone().unwrap_or_default(),
			namespace: meta.namespace.clone(),
			uid: meta.uid.clone().unwrap_or_default(),
			kind: K::kind(&()).into_owned(),
		}
	}
}

/// Registry of the kinds the operator knows the group and version of.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
	kinds: HashMap<String, GroupVersionKind>,
}

impl Scheme {
	pub fn register<K: Resource<DynamicType = ()>>(mut self) -> Self {
		let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
		self.kinds.insert(gvk.kind.clone(), gvk);
		self
	}

	pub fn gvk_for(&self, owner: &OwningResource) -> Result<GroupVersionKind, SchemeError> {
		self.kinds
			.get(&owner.kind)
			.cloned()
			.ok_or_else(|| SchemeError::UnregisteredKind(owner.kind.clone()))
	}
}

/// Stamps owner references onto managed objects.
#[derive(Debug, Clone)]
pub struct OwnerRefInjector {
	scheme: Scheme,
}

impl OwnerRefInjector {
	pub fn new(scheme: Scheme) -> Self {
		Self { scheme }
	}

	/// Append a controller owner reference for every eligible owner to
	/// `target.attributes.metadata.ownerReferences`.
	///
	/// Owners without name or UID, owners of unregistered kinds, and owners whose
	/// kind has no group (core types) are skipped.
	#[instrument(skip_all, fields(object = %target.display_name()))]
	pub fn set_owner_ref(
		&self,
		owners: &[OwningResource],
		target: &mut ManagedObject,
	) -> Result<(), SchemeError> {
		tracing::debug!("injecting owner references");

		for owner in owners {
			if owner.name.is_empty() {
				tracing::info!(kind = %owner.kind, "owner has no name");
				continue;
			}
			if owner.uid.is_empty() {
				tracing::info!(owner = %owner.name, "owner has no UID");
				continue;
			}

			let gvk = match self.scheme.gvk_for(owner) {
				Ok(gvk) => gvk,
				Err(e) => {
					tracing::error!(owner = %owner.name, error = %e, "failed to get GVK");
					continue;
				}
			};
			if gvk.group.is_empty() || gvk.version.is_empty() {
				tracing::info!(
					owner = %owner.name,
					api_version = %gvk.api_version(),
					kind = %gvk.kind,
					"owner kind is not valid"
				);
				continue;
			}

			let reference = json!({
				"apiVersion": format!("{}/{}", gvk.group, gvk.version),
				"kind": gvk.kind,
				"name": owner.name,
				"uid": owner.uid,
				"controller": true,
				"blockOwnerDeletion": true,
			});
			value::push(
				&mut target.attributes,
				&["metadata", "ownerReferences"],
				reference,
			)
			.map_err(|source| SchemeError::Metadata {
				object: target.display_name(),
				source,
			})?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use assert_matches::assert_matches;
	use k8s_openapi::api::core::v1::Namespace;
	use serde_json::Value;

	use super::*;
	use crate::crd::CertManager;

	fn target(attributes: Value) -> ManagedObject {
		ManagedObject {
			raw: Arc::from(&b""[..]),
			typed: None,
			attributes,
			name: "webhook".into(),
			namespace: "cert-manager".into(),
			group: "apps".into(),
			version: "v1".into(),
			kind: "Deployment".into(),
		}
	}

	fn owner() -> OwningResource {
		OwningResource {
			name: "certmanager-sample".into(),
			namespace: None,
			uid: "4b6c1a2e-0000-4000-8000-000000000001".into(),
			kind: "CertManager".into(),
		}
	}

	fn injector() -> OwnerRefInjector {
		OwnerRefInjector::new(Scheme::default().register::<CertManager>().register::<Namespace>())
	}

	#[test]
	fn test_valid_owner_appends_reference() {
		let mut obj = target(json!({"metadata": {"name": "webhook"}}));
		injector().set_owner_ref(&[owner()], &mut obj).unwrap();
		assert_eq!(
			obj.attributes["metadata"]["ownerReferences"],
			json!([{
				"apiVersion": "addons.x-force.netapp.io/v1alpha1",
				"kind": "CertManager",
				"name": "certmanager-sample",
				"uid": "4b6c1a2e-0000-4000-8000-000000000001",
				"controller": true,
				"blockOwnerDeletion": true,
			}])
		);
	}

	#[test]
	fn test_existing_references_kept() {
		let mut obj = target(json!({"metadata": {"ownerReferences": [{"name": "other"}]}}));
		injector().set_owner_ref(&[owner()], &mut obj).unwrap();
		let refs = obj.attributes["metadata"]["ownerReferences"].as_array().unwrap();
		assert_eq!(refs.len(), 2);
		assert_eq!(refs[0], json!({"name": "other"}));
	}

	#[test]
	fn test_owner_without_uid_skipped() {
		let original = json!({"metadata": {"name": "webhook"}});
		let mut obj = target(original.clone());
		let owner = OwningResource {
			uid: String::new(),
			..owner()
		};
		injector().set_owner_ref(&[owner], &mut obj).unwrap();
		assert_eq!(obj.attributes, original);
	}

	#[test]
	fn test_owner_without_name_skipped() {
		let original = json!({"metadata": {"name": "webhook"}});
		let mut obj = target(original.clone());
		let owner = OwningResource {
			name: String::new(),
			..owner()
		};
		injector().set_owner_ref(&[owner], &mut obj).unwrap();
		assert_eq!(obj.attributes, original);
	}

	#[test]
	fn test_unregistered_kind_skipped() {
		let original = json!({"metadata": {"name": "webhook"}});
		let mut obj = target(original.clone());
		let owner = OwningResource {
			kind: "Issuer".into(),
			..owner()
		};
		injector().set_owner_ref(&[owner], &mut obj).unwrap();
		assert_eq!(obj.attributes, original);
	}

	#[test]
	fn test_core_group_owner_skipped() {
		let original = json!({"metadata": {"name": "webhook"}});
		let mut obj = target(original.clone());
		let owner = OwningResource {
			kind: "Namespace".into(),
			..owner()
		};
		injector().set_owner_ref(&[owner], &mut obj).unwrap();
		assert_eq!(obj.attributes, original);
	}

	#[test]
	fn test_only_eligible_owners_written() {
		let mut obj = target(json!({"metadata": {}}));
		let second = OwningResource {
			name: "second".into(),
			uid: "uid-2".into(),
			..owner()
		};
		let broken = OwningResource {
			uid: String::new(),
			..owner()
		};
		injector()
			.set_owner_ref(&[owner(), broken, second], &mut obj)
			.unwrap();
		let names: Vec<_> = obj.attributes["metadata"]["ownerReferences"]
			.as_array()
			.unwrap()
			.iter()
			.map(|r| r["name"].as_str().unwrap())
			.collect();
		assert_eq!(names, vec!["certmanager-sample", "second"]);
	}

	#[test]
	fn test_malformed_metadata_is_error() {
		let mut obj = target(json!({"metadata": {"ownerReferences": "nope"}}));
		assert_matches!(
			injector().set_owner_ref(&[owner()], &mut obj),
			Err(SchemeError::Metadata { object, .. }) if object == "cert-manager/webhook"
		);
	}

	#[test]
	fn test_from_resource() {
		let mut cm = CertManager::new("sample", Default::default());
		cm.metadata.uid = Some("uid-1".into());
		assert_eq!(
			OwningResource::from_resource(&cm),
			OwningResource {
				name: "sample".into(),
				namespace: None,
				uid: "uid-1".into(),
				kind: "CertManager".into(),
			}
		);
	}
}
