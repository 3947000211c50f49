//! Kubernetes cluster connection management.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error("neither in-cluster configuration nor a kubeconfig is available")]
	Infer(#[from] InferConfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (context name or API server URL).
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect to the cluster the operator runs against.
	///
	/// With an explicit context the local kubeconfig is used; otherwise the
	/// configuration is inferred (in-cluster service account first, then the
	/// current kubeconfig context).
	#[instrument]
	pub async fn connect(context: Option<&str>) -> Result<Self, ConnectionError> {
		match context {
			Some(context) => {
				let kubeconfig = Kubeconfig::read()?;
				Self::from_kubeconfig(kubeconfig, Some(context)).await
			}
			None => {
				let config = Config::infer().await?;
				let identifier = config.cluster_url.to_string();
				Self::from_config(config, identifier).await
			}
		}
	}

	/// Connect using a provided kubeconfig, optionally overriding its current context.
	#[instrument(skip(kubeconfig))]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		context: Option<&str>,
	) -> Result<Self, ConnectionError> {
		if let Some(context) = context {
			if !kubeconfig.contexts.iter().any(|c| c.name == context) {
				return Err(ConnectionError::ContextNotFound(context.to_string()));
			}
		}

		let identifier = context
			.map(str::to_string)
			.or_else(|| kubeconfig.current_context.clone())
			.unwrap_or_default();

		let config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: context.map(str::to_string),
				..Default::default()
			},
		)
		.await?;

		Self::from_config(config, format!("context:{}", identifier)).await
	}

	async fn from_config(
		mut config: Config,
		cluster_identifier: String,
	) -> Result<Self, ConnectionError> {
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;

		let server_version = client.apiserver_version().await?;
		tracing::debug!(
			cluster = %cluster_identifier,
			version = %server_version.git_version,
			"connected"
		);

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the cluster identifier (context name or API server URL).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}
