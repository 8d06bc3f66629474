//! Explicit source registration

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crawl_sync::{SourceRegistry, SyncError};

use crate::client::HttpClient;
use crate::private_feeds::{PrivateFeedRegistry, PrivateFeedsSource};
use crate::rss::{FeedSourceConfig, RssFeedSource};

/// Register the enabled configured feeds in order, then the private feed source
pub fn build_registry(
    configs: &[FeedSourceConfig],
    private_registry_path: &Path,
    http: &HttpClient,
) -> crawl_sync::Result<SourceRegistry> {
    let mut registry = SourceRegistry::new();

    for config in configs.iter().filter(|c| c.enabled) {
        if config.id.trim().is_empty() {
            return Err(SyncError::source_error("<unnamed>", "configured source has an empty id"));
        }
        debug!(source_id = %config.id, url = %config.url, "Registering feed source");
        registry.register(Arc::new(RssFeedSource::new(config.clone(), http.clone())))?;
    }

    let private = PrivateFeedRegistry::new(private_registry_path);
    registry.register(Arc::new(PrivateFeedsSource::new(private, http.clone())))?;

    Ok(registry)
}
