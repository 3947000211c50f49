//! Kubernetes side of the apply engine.
//!
//! Resolution of manifests to API endpoints, owner reference injection and the
//! create-or-patch protocol, all on top of kube-rs dynamic objects.

pub mod apply;
pub mod client;
pub mod discovery;
pub mod owner;

/// Whether `err` is an API `404 Not Found` response.
pub fn is_not_found(err: &kube::Error) -> bool {
	matches!(err, kube::Error::Api(response) if response.code == 404)
}
