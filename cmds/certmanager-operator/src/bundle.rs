//! The cert-manager manifests compiled into the operator.

use crate::manifest::store::StaticStore;

/// Built-in manifest bundles, applied in file name order.
pub static BUNDLE: StaticStore = StaticStore::new(&[
	(
		"00-namespace.yaml",
		include_bytes!("../manifests/00-namespace.yaml") as &[u8],
	),
	(
		"10-rbac.yaml",
		include_bytes!("../manifests/10-rbac.yaml") as &[u8],
	),
	(
		"20-controller.yaml",
		include_bytes!("../manifests/20-controller.yaml") as &[u8],
	),
	(
		"30-webhook.yaml",
		include_bytes!("../manifests/30-webhook.yaml") as &[u8],
	),
]);
