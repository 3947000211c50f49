//! Create-or-patch of managed objects.
//!
//! Objects are applied with a forced server-side apply, which both creates
//! missing objects and takes over fields previously written by other managers.
//! `APIService` objects are the exception: the API server mishandles apply
//! patches for them (kubernetes/kubernetes#89264), so they are only created
//! when absent and otherwise left alone.

use kube::{
	api::{Api, DynamicObject, Patch, PatchParams, PostParams},
	discovery::ApiResource,
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{DiscoveryResolver, ResolveError, ResourceResolver},
	is_not_found,
};
use crate::manifest::ManagedObject;

/// Field manager recorded for every field this operator applies.
pub const FIELD_MANAGER: &str = "certmanager-controller";

const API_SERVICE_GROUP: &str = "apiregistration.k8s.io";
const API_SERVICE_KIND: &str = "APIService";

/// Errors that can occur during apply operations.
#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("resolving resource for {kind} {object}")]
	Resolve {
		kind: String,
		object: String,
		#[source]
		source: ResolveError,
	},

	#[error("cannot get {resource} {object}")]
	Get {
		resource: String,
		object: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("cannot create {resource} {object}")]
	Create {
		resource: String,
		object: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("cannot apply {resource} {object}")]
	Patch {
		resource: String,
		object: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("converting {kind} {object} to a DynamicObject")]
	Conversion {
		kind: String,
		object: String,
		#[source]
		source: serde_json::Error,
	},
}

/// What an apply did to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
	/// Server-side apply patch sent.
	Patched,
	/// Object was absent and got created.
	Created,
	/// Object exists and is not touched by this apply path.
	Skipped,
}

/// Applies managed objects to the cluster.
pub struct Applier<R = DiscoveryResolver> {
	client: Client,
	resolver: R,
}

impl<R: ResourceResolver> Applier<R> {
	pub fn new(client: Client, resolver: R) -> Self {
		Self { client, resolver }
	}

	/// Apply a single object.
	///
	/// Performs at most one write: a patch, a create, or nothing when an existing
	/// `APIService` is found.
	#[instrument(skip_all, fields(kind = %obj.kind, object = %obj.display_name()))]
	pub async fn apply(&self, obj: &ManagedObject) -> Result<ApplyOutcome, ApplyError> {
		let gvk = obj.gvk();
		let resource =
			self.resolver
				.resolve(&gvk)
				.await
				.map_err(|source| ApplyError::Resolve {
					kind: obj.kind.clone(),
					object: obj.display_name(),
					source,
				})?;

		let api = self.dynamic_api(&resource, &obj.namespace);

		let outcome = if obj.group == API_SERVICE_GROUP && obj.kind == API_SERVICE_KIND {
			tracing::info!("APIService cannot be applied, creating it if absent");
			self.create_if_absent(&api, &resource, obj).await?
		} else {
			self.force_apply(&api, &resource, obj).await?
		};

		match outcome {
			ApplyOutcome::Skipped => tracing::info!("skipped"),
			_ => tracing::info!(?outcome, "applied"),
		}
		Ok(outcome)
	}

	async fn create_if_absent(
		&self,
		api: &Api<DynamicObject>,
		resource: &ApiResource,
		obj: &ManagedObject,
	) -> Result<ApplyOutcome, ApplyError> {
		match api.get(&obj.name).await {
			Ok(_) => Ok(ApplyOutcome::Skipped),
			Err(e) if is_not_found(&e) => {
				let body: DynamicObject = serde_json::from_value(obj.attributes.clone())
					.map_err(|source| ApplyError::Conversion {
						kind: obj.kind.clone(),
						object: obj.display_name(),
						source,
					})?;
				api.create(&PostParams::default(), &body)
					.await
					.map_err(|e| ApplyError::Create {
						resource: resource_id(resource),
						object: obj.display_name(),
						source: Box::new(e),
					})?;
				Ok(ApplyOutcome::Created)
			}
			Err(e) => Err(ApplyError::Get {
				resource: resource_id(resource),
				object: obj.display_name(),
				source: Box::new(e),
			}),
		}
	}

	async fn force_apply(
		&self,
		api: &Api<DynamicObject>,
		resource: &ApiResource,
		obj: &ManagedObject,
	) -> Result<ApplyOutcome, ApplyError> {
		// Force is required to take over fields set by earlier non-apply writers
		// (kubernetes/kubernetes#89954).
		let params = PatchParams::apply(FIELD_MANAGER).force();

		match api
			.patch(&obj.name, &params, &Patch::Apply(&obj.attributes))
			.await
		{
			Ok(_) => Ok(ApplyOutcome::Patched),
			Err(e) => {
				if is_not_found(&e) {
					// The endpoint itself is gone; a cached resolution is stale.
					self.resolver.invalidate(&obj.gvk());
				}
				Err(ApplyError::Patch {
					resource: resource_id(resource),
					object: obj.display_name(),
					source: Box::new(e),
				})
			}
		}
	}

	fn dynamic_api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
		if namespace.is_empty() {
			Api::all_with(self.client.clone(), resource)
		} else {
			Api::namespaced_with(self.client.clone(), namespace, resource)
		}
	}
}

/// `plural.version.group` as printed by kubectl, e.g. `roles.v1.rbac.authorization.k8s.io`.
fn resource_id(resource: &ApiResource) -> String {
	if resource.group.is_empty() {
		format!("{}.{}", resource.plural, resource.version)
	} else {
		format!("{}.{}.{}", resource.plural, resource.version, resource.group)
	}
}
