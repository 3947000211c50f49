//! Providers of raw manifest bundles.

use std::{
	borrow::Cow,
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::instrument;

/// A read-only set of named manifest bundles.
///
/// Bundles never change for the lifetime of the store; `names` is stable and
/// determines the order in which bundles are loaded.
pub trait ManifestStore: Send + Sync {
	/// Names of all bundles, in load order.
	fn names(&self) -> Vec<String>;

	/// Contents of the bundle called `name`.
	fn get(&self, name: &str) -> Option<Cow<'_, [u8]>>;
}

/// Bundles compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct StaticStore {
	bundles: &'static [(&'static str, &'static [u8])],
}

impl StaticStore {
	pub const fn new(bundles: &'static [(&'static str, &'static [u8])]) -> Self {
		Self { bundles }
	}
}

impl ManifestStore for StaticStore {
	fn names(&self) -> Vec<String> {
		let mut names: Vec<_> = self.bundles.iter().map(|(n, _)| n.to_string()).collect();
		names.sort();
		names
	}

	fn get(&self, name: &str) -> Option<Cow<'_, [u8]>> {
		self.bundles
			.iter()
			.find(|(n, _)| *n == name)
			.map(|(_, data)| Cow::Borrowed(*data))
	}
}

/// Errors raised while reading a manifest directory.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("reading manifest directory {}", path.display())]
	ReadDir {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("reading manifest {}", path.display())]
	ReadFile {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

/// Bundles read from `*.yaml`/`*.yml` files of a directory.
///
/// The directory is read once; later changes on disk are not observed.
#[derive(Debug, Clone, Default)]
pub struct DirectoryStore {
	bundles: BTreeMap<String, Vec<u8>>,
}

impl DirectoryStore {
	#[instrument]
	pub fn read(dir: &Path) -> Result<Self, StoreError> {
		let entries = fs::read_dir(dir).map_err(|source| StoreError::ReadDir {
			path: dir.to_path_buf(),
			source,
		})?;

		let mut bundles = BTreeMap::new();
		for entry in entries {
			let entry = entry.map_err(|source| StoreError::ReadDir {
				path: dir.to_path_buf(),
				source,
			})?;
			let path = entry.path();
			let is_yaml = path
				.extension()
				.is_some_and(|ext| ext == "yaml" || ext == "yml");
			if !is_yaml || !path.is_file() {
				continue;
			}
			let data = fs::read(&path).map_err(|source| StoreError::ReadFile {
				path: path.clone(),
				source,
			})?;
			let name = entry.file_name().to_string_lossy().into_owned();
			tracing::debug!(bundle = %name, bytes = data.len(), "read manifest bundle");
			bundles.insert(name, data);
		}

		Ok(Self { bundles })
	}
}

impl ManifestStore for DirectoryStore {
	fn names(&self) -> Vec<String> {
		self.bundles.keys().cloned().collect()
	}

	fn get(&self, name: &str) -> Option<Cow<'_, [u8]>> {
		self.bundles.get(name).map(|d| Cow::Borrowed(d.as_slice()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	static BUNDLES: &[(&str, &[u8])] = &[("b.yaml", b"kind: B"), ("a.yaml", b"kind: A")];

	#[test]
	fn test_static_store_sorted() {
		let store = StaticStore::new(BUNDLES);
		assert_eq!(store.names(), vec!["a.yaml", "b.yaml"]);
		assert_eq!(store.get("a.yaml").as_deref(), Some(&b"kind: A"[..]));
		assert!(store.get("missing.yaml").is_none());
	}

	#[test]
	fn test_directory_store_filters_extensions() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("10-rbac.yaml"), "kind: Role").unwrap();
		fs::write(dir.path().join("00-ns.yml"), "kind: Namespace").unwrap();
		fs::write(dir.path().join("README.md"), "# docs").unwrap();
		fs::create_dir(dir.path().join("nested.yaml")).unwrap();

		let store = DirectoryStore::read(dir.path()).unwrap();
		assert_eq!(store.names(), vec!["00-ns.yml", "10-rbac.yaml"]);
		assert_eq!(store.get("10-rbac.yaml").as_deref(), Some(&b"kind: Role"[..]));
	}

	#[test]
	fn test_directory_store_missing_dir() {
		let dir = tempfile::tempdir().unwrap();
		let err = DirectoryStore::read(&dir.path().join("absent")).unwrap_err();
		assert!(matches!(err, StoreError::ReadDir { .. }));
	}
}
