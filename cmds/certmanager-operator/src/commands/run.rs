//! Run command handler.
//!
//! Loads the manifest set, connects to the cluster and drives the `CertManager`
//! controller until a termination signal arrives.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use clap::Args;
use futures::StreamExt;
use kube::{
	runtime::{watcher, Controller},
	Api, Client,
};
use tracing::instrument;

use crate::{
	bundle::BUNDLE,
	config::OperatorConfig,
	crd::CertManager,
	k8s::{
		apply::Applier,
		client::ClusterConnection,
		discovery::DiscoveryResolver,
		owner::{OwnerRefInjector, Scheme},
	},
	manifest::{
		store::{DirectoryStore, ManifestStore},
		ManagedObject, ManifestLoader,
	},
	reconcile::{error_policy, reconcile, Backoff, Context, Reconciler},
};

#[derive(Args, Default)]
pub struct RunArgs {
	/// YAML file with defaults for the flags below
	#[arg(long)]
	pub config: Option<PathBuf>,

	/// Kubeconfig context to use instead of the in-cluster configuration
	#[arg(long)]
	pub kubeconfig_context: Option<String>,

	/// Read manifests from this directory instead of the built-in bundle
	#[arg(long)]
	pub manifest_dir: Option<PathBuf>,

	/// Remember discovery results for this many seconds (0 disables)
	#[arg(long, value_name = "SECONDS")]
	pub discovery_cache_ttl: Option<u64>,
}

impl RunArgs {
	/// Combine the config file (if any) with the flags, flags taking priority.
	pub fn resolve_config(&self) -> Result<OperatorConfig> {
		let mut config = match &self.config {
			Some(path) => OperatorConfig::load_from_file(path)?,
			None => OperatorConfig::default(),
		};
		config.merge_from(OperatorConfig {
			kubeconfig_context: self.kubeconfig_context.clone(),
			manifest_dir: self.manifest_dir.clone(),
			discovery_cache_ttl: self.discovery_cache_ttl,
		});
		Ok(config)
	}
}

pub fn run(args: RunArgs) -> Result<()> {
	let config = args.resolve_config()?;

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run_async(config))
}

/// Load the manifest set named by `config`; any malformed manifest is fatal.
#[instrument(skip_all)]
pub fn load_manifests(config: &OperatorConfig) -> Result<Arc<[ManagedObject]>> {
	let store: Arc<dyn ManifestStore> = match &config.manifest_dir {
		Some(dir) => Arc::new(DirectoryStore::read(dir)?),
		None => Arc::new(BUNDLE),
	};
	let objects = ManifestLoader::new(store)
		.load_objects()
		.context("loading manifests")?;
	tracing::info!(count = objects.len(), "loaded objects");
	Ok(objects.into())
}

/// Assemble the reconciler for a connected client.
pub fn build_reconciler(
	client: Client,
	config: &OperatorConfig,
	objects: Arc<[ManagedObject]>,
) -> Reconciler {
	let resolver = match config.discovery_cache_ttl() {
		Some(ttl) => DiscoveryResolver::with_cache(client.clone(), ttl),
		None => DiscoveryResolver::new(client.clone()),
	};
	let injector = OwnerRefInjector::new(Scheme::default().register::<CertManager>());
	Reconciler::new(
		client.clone(),
		Applier::new(client, resolver),
		injector,
		objects,
	)
}

async fn run_async(config: OperatorConfig) -> Result<()> {
	let objects = load_manifests(&config)?;

	let connection = ClusterConnection::connect(config.kubeconfig_context.as_deref())
		.await
		.context("connecting to cluster")?;
	tracing::info!(
		cluster = %connection.cluster_identifier(),
		version = %connection.server_version().git_version,
		"starting controller"
	);

	let client = connection.client().clone();
	let api: Api<CertManager> = Api::all(client.clone());
	let ctx = Arc::new(Context {
		reconciler: build_reconciler(client, &config, objects),
		backoff: Backoff::default(),
	});

	Controller::new(api, watcher::Config::default())
		.shutdown_on_signal()
		.run(reconcile, error_policy, ctx)
		.for_each(|result| async move {
			match result {
				Ok((obj, action)) => tracing::debug!(object = %obj, ?action, "reconciled"),
				Err(e) => tracing::debug!(error = %e, "controller error"),
			}
		})
		.await;

	tracing::info!("controller stopped");
	Ok(())
}
