//! The `CertManager` custom resource.
//!
//! Creating one of these asks the operator to install the bundled manifests;
//! deleting it removes them again through their owner references.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a cert-manager installation.
///
/// The installation is fully described by the bundled manifests; the spec has no
/// fields yet. The resource is cluster-scoped: the bundle holds cluster-scoped objects
/// and objects in the `cert-manager` namespace, and an owner reference is only valid
/// for the garbage collector when the owner is cluster-scoped or shares the
/// dependent's namespace.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
	group = "addons.x-force.netapp.io",
	version = "v1alpha1",
	kind = "CertManager",
	plural = "certmanagers"
)]
pub struct CertManagerSpec {}
