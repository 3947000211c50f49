//! Reconciliation of `CertManager` objects.
//!
//! A reconcile fetches the custom resource, then walks the loaded manifests in
//! bundle order, stamping an owner reference onto each and applying it. The first
//! failure ends the pass; retrying is left to the controller's error policy.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use kube::{
	runtime::{controller::Action, reflector::ObjectRef},
	Api, Client, ResourceExt,
};
use thiserror::Error;
use tracing::instrument;

use crate::{
	crd::CertManager,
	k8s::{
		apply::{Applier, ApplyError, ApplyOutcome},
		discovery::{DiscoveryResolver, ResourceResolver},
		owner::{OwnerRefInjector, OwningResource, SchemeError},
	},
	manifest::ManagedObject,
};

/// Errors that end a reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("reading {kind} {name}")]
	Fetch {
		kind: &'static str,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("injecting owner references into {object}")]
	OwnerRef {
		object: String,
		#[source]
		source: SchemeError,
	},

	#[error(transparent)]
	Apply(#[from] ApplyError),
}

impl ReconcileError {
	/// Stage the pass was in when it failed.
	pub fn phase(&self) -> Phase {
		match self {
			Self::Fetch { .. } => Phase::Fetching,
			Self::OwnerRef { .. } | Self::Apply(_) => Phase::Applying,
		}
	}
}

/// Working stages of a reconcile pass.
///
/// A pass moves from `Fetching` to `Applying`; it ends `Done` when `reconcile`
/// returns `Ok` and `Errored` when it returns `Err`, whose [`ReconcileError::phase`]
/// names the stage it stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Fetching,
	Applying,
}

/// Counts of what a successful pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
	pub patched: usize,
	pub created: usize,
	pub skipped: usize,
}

impl ApplySummary {
	fn record(&mut self, outcome: ApplyOutcome) {
		match outcome {
			ApplyOutcome::Patched => self.patched += 1,
			ApplyOutcome::Created => self.created += 1,
			ApplyOutcome::Skipped => self.skipped += 1,
		}
	}
}

/// Result of a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
	/// The custom resource no longer exists; nothing was applied.
	OwnerGone,
	Applied(ApplySummary),
}

/// Applies the manifest set on behalf of `CertManager` objects.
pub struct Reconciler<R = DiscoveryResolver> {
	client: Client,
	applier: Applier<R>,
	injector: OwnerRefInjector,
	objects: Arc<[ManagedObject]>,
}

impl<R: ResourceResolver> Reconciler<R> {
	pub fn new(
		client: Client,
		applier: Applier<R>,
		injector: OwnerRefInjector,
		objects: Arc<[ManagedObject]>,
	) -> Self {
		Self {
			client,
			applier,
			injector,
			objects,
		}
	}

	/// Number of manifests applied per pass.
	pub fn object_count(&self) -> usize {
		self.objects.len()
	}

	/// Run one pass for the `CertManager` called `name`.
	#[instrument(skip(self))]
	pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
		let result = self.run(name).await;
		match &result {
			Ok(outcome) => tracing::debug!(?outcome, "reconcile done"),
			Err(e) => tracing::debug!(phase = ?e.phase(), error = %e, "reconcile errored"),
		}
		result
	}

	async fn run(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
		tracing::debug!(phase = ?Phase::Fetching, "reading object");
		let api: Api<CertManager> = Api::all(self.client.clone());
		let instance = match api.get_opt(name).await {
			Ok(Some(instance)) => instance,
			Ok(None) => {
				tracing::debug!("object no longer exists");
				return Ok(ReconcileOutcome::OwnerGone);
			}
			Err(e) => {
				tracing::error!(error = %e, "error reading object");
				return Err(ReconcileError::Fetch {
					kind: "CertManager",
					name: name.to_string(),
					source: Box::new(e),
				});
			}
		};

		tracing::info!(phase = ?Phase::Applying, objects = self.objects.len(), "reconciling");
		let owners = [OwningResource::from_resource(&instance)];
		let mut summary = ApplySummary::default();

		for object in self.objects.iter() {
			tracing::info!(object = %object.name, "applying");
			let mut target = object.clone();
			self.injector
				.set_owner_ref(&owners, &mut target)
				.map_err(|source| ReconcileError::OwnerRef {
					object: target.display_name(),
					source,
				})?;
			let outcome = self.applier.apply(&target).await?;
			summary.record(outcome);
		}

		tracing::info!(
			patched = summary.patched,
			created = summary.created,
			skipped = summary.skipped,
			"reconciled"
		);
		Ok(ReconcileOutcome::Applied(summary))
	}
}

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Per-object exponential backoff for failed reconciles.
#[derive(Debug, Default)]
pub struct Backoff {
	failures: Mutex<HashMap<ObjectRef<CertManager>, u32>>,
}

impl Backoff {
	/// Record a failure and return how long to wait before retrying.
	pub fn failed(&self, key: ObjectRef<CertManager>) -> Duration {
		let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
		let count = failures.entry(key).or_insert(0);
		let delay = BACKOFF_BASE
			.saturating_mul(2u32.saturating_pow(*count))
			.min(BACKOFF_MAX);
		*count = count.saturating_add(1);
		delay
	}

	pub fn succeeded(&self, key: &ObjectRef<CertManager>) {
		let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
		failures.remove(key);
	}
}

/// Shared state handed to every controller invocation.
pub struct Context<R = DiscoveryResolver> {
	pub reconciler: Reconciler<R>,
	pub backoff: Backoff,
}

/// Controller entry point.
pub async fn reconcile<R: ResourceResolver>(
	obj: Arc<CertManager>,
	ctx: Arc<Context<R>>,
) -> Result<Action, ReconcileError> {
	ctx.reconciler.reconcile(&obj.name_any()).await?;
	ctx.backoff.succeeded(&ObjectRef::from_obj(obj.as_ref()));
	Ok(Action::await_change())
}

/// Controller error policy: requeue with exponential backoff.
pub fn error_policy<R: ResourceResolver>(
	obj: Arc<CertManager>,
	error: &ReconcileError,
	ctx: Arc<Context<R>>,
) -> Action {
	let delay = ctx.backoff.failed(ObjectRef::from_obj(obj.as_ref()));
	tracing::warn!(
		object = %obj.name_any(),
		error = %error,
		retry_in = ?delay,
		"reconcile failed"
	);
	Action::requeue(delay)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(name: &str) -> ObjectRef<CertManager> {
		ObjectRef::new(name)
	}

	#[test]
	fn test_backoff_doubles_and_caps() {
		let backoff = Backoff::default();
		let delays: Vec<_> = (0..8).map(|_| backoff.failed(key("a")).as_secs()).collect();
		assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
	}

	#[test]
	fn test_backoff_is_per_object_and_resets() {
		let backoff = Backoff::default();
		backoff.failed(key("a"));
		backoff.failed(key("a"));
		assert_eq!(backoff.failed(key("b")), Duration::from_secs(5));

		backoff.succeeded(&key("a"));
		assert_eq!(backoff.failed(key("a")), Duration::from_secs(5));
	}

	#[test]
	fn test_owner_ref_error_stops_in_applying() {
		let err = ReconcileError::OwnerRef {
			object: "cert-manager/webhook".into(),
			source: SchemeError::UnregisteredKind("Widget".into()),
		};
		assert_eq!(err.phase(), Phase::Applying);
	}

	#[test]
	fn test_summary_record() {
		let mut summary = ApplySummary::default();
		summary.record(ApplyOutcome::Patched);
		summary.record(ApplyOutcome::Patched);
		summary.record(ApplyOutcome::Skipped);
		assert_eq!(
			summary,
			ApplySummary {
				patched: 2,
				created: 0,
				skipped: 1,
			}
		);
	}
}
