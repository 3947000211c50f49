//! Resolution of kinds to API resources through cluster discovery.
//!
//! Every lookup runs discovery against the API server, so a resource type that
//! appears or disappears (for example, a CRD installed by an earlier manifest of
//! the same bundle) is picked up on the next apply. An optional short-lived cache
//! trades that freshness for fewer discovery round trips.

use std::{
	collections::HashMap,
	future::Future,
	sync::Mutex,
	time::{Duration, Instant},
};

use kube::{core::GroupVersionKind, discovery::ApiResource, Client, Discovery};
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur while resolving a kind.
#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("API discovery failed")]
	Discovery(#[source] kube::Error),

	#[error("no resource found for {api_version}, Kind={kind}")]
	NotFound { api_version: String, kind: String },
}

impl ResolveError {
	fn not_found(gvk: &GroupVersionKind) -> Self {
		Self::NotFound {
			api_version: gvk.api_version(),
			kind: gvk.kind.clone(),
		}
	}
}

/// Maps a group/version/kind to the API resource serving it.
pub trait ResourceResolver: Send + Sync {
	/// Find the resource (and with it the plural endpoint name) for `gvk`.
	fn resolve(
		&self,
		gvk: &GroupVersionKind,
	) -> impl Future<Output = Result<ApiResource, ResolveError>> + Send;

	/// Forget anything remembered about `gvk`, e.g. after its endpoint returned 404.
	fn invalidate(&self, _gvk: &GroupVersionKind) {}
}

/// Resolver backed by the cluster's discovery API.
pub struct DiscoveryResolver {
	client: Client,
	cache: Option<ResolutionCache>,
}

impl DiscoveryResolver {
	/// Resolver that runs discovery on every call.
	pub fn new(client: Client) -> Self {
		Self {
			client,
			cache: None,
		}
	}

	/// Resolver that remembers successful resolutions for `ttl`.
	pub fn with_cache(client: Client, ttl: Duration) -> Self {
		Self {
			client,
			cache: Some(ResolutionCache::new(ttl)),
		}
	}

	/// Run discovery, preferring the aggregated endpoints (K8s 1.26+) which need only
	/// two requests, and falling back to walking every group version.
	#[instrument(skip(self))]
	async fn discover(&self) -> Result<Discovery, ResolveError> {
		match Discovery::new(self.client.clone()).run_aggregated().await {
			Ok(discovery) => Ok(discovery),
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				Discovery::new(self.client.clone())
					.run()
					.await
					.map_err(ResolveError::Discovery)
			}
		}
	}
}

impl ResourceResolver for DiscoveryResolver {
	#[instrument(skip(self), fields(api_version = %gvk.api_version(), kind = %gvk.kind))]
	async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ApiResource, ResolveError> {
		if let Some(resource) = self.cache.as_ref().and_then(|c| c.get(gvk)) {
			tracing::trace!(plural = %resource.plural, "resolved from cache");
			return Ok(resource);
		}

		let discovery = self.discover().await?;
		match discovery.resolve_gvk(gvk) {
			Some((resource, _capabilities)) => {
				tracing::debug!(plural = %resource.plural, "resolved");
				if let Some(cache) = &self.cache {
					cache.insert(gvk, &resource);
				}
				Ok(resource)
			}
			// Misses are never cached, so a kind that appears later is found.
			None => Err(ResolveError::not_found(gvk)),
		}
	}

	fn invalidate(&self, gvk: &GroupVersionKind) {
		if let Some(cache) = &self.cache {
			cache.remove(gvk);
		}
	}
}

/// Per-kind resolution cache with a fixed time to live.
struct ResolutionCache {
	ttl: Duration,
	entries: Mutex<HashMap<GroupVersionKind, (ApiResource, Instant)>>,
}

impl ResolutionCache {
	fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			entries: Mutex::new(HashMap::new()),
		}
	}

	fn get(&self, gvk: &GroupVersionKind) -> Option<ApiResource> {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		match entries.get(gvk) {
			Some((resource, at)) if at.elapsed() < self.ttl => Some(resource.clone()),
			Some(_) => {
				entries.remove(gvk);
				None
			}
			None => None,
		}
	}

	fn insert(&self, gvk: &GroupVersionKind, resource: &ApiResource) {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		entries.insert(gvk.clone(), (resource.clone(), Instant::now()));
	}

	fn remove(&self, gvk: &GroupVersionKind) {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		entries.remove(gvk);
	}
}
