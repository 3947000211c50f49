//! Operator configuration file support.
//!
//! An optional YAML file (`--config`) supplies defaults for the `run` flags; any
//! flag given on the command line wins over the file.

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

/// Errors reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file: {}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},
}

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OperatorConfig {
	/// Kubeconfig context to connect with; in-cluster/inferred config when unset.
	#[serde(default)]
	pub kubeconfig_context: Option<String>,

	/// Directory to read manifests from instead of the built-in bundle.
	#[serde(default)]
	pub manifest_dir: Option<PathBuf>,

	/// Seconds to remember discovery results for; every apply runs discovery when unset.
	#[serde(default)]
	pub discovery_cache_ttl: Option<u64>,
}

impl OperatorConfig {
	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		serde_yaml_with_quirks::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Overlay `other` onto this config; fields set in `other` win.
	pub fn merge_from(&mut self, other: OperatorConfig) {
		if other.kubeconfig_context.is_some() {
			self.kubeconfig_context = other.kubeconfig_context;
		}
		if other.manifest_dir.is_some() {
			self.manifest_dir = other.manifest_dir;
		}
		if other.discovery_cache_ttl.is_some() {
			self.discovery_cache_ttl = other.discovery_cache_ttl;
		}
	}

	pub fn discovery_cache_ttl(&self) -> Option<Duration> {
		self.discovery_cache_ttl
			.filter(|secs| *secs > 0)
			.map(Duration::from_secs)
	}
}
