use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::CredentialsConfig;
use crate::message::Channel;

use super::sources::{
    CredentialError, CredentialSource, Credentials, LegacySource, SettingsSource,
};

/// Ordered multi-source credential resolution.
///
/// Source order is configuration, not a hard-coded priority; new storage
/// schemes slot in without touching callers.
pub struct CredentialResolver {
    sources: Vec<Arc<dyn CredentialSource>>,
}

impl CredentialResolver {
    pub fn new(sources: Vec<Arc<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    /// Build a resolver from the configured source order.
    ///
    /// Unknown source names are skipped with a warning.
    pub fn from_config(config: &CredentialsConfig, pool: &SqlitePool) -> Self {
        let mut sources: Vec<Arc<dyn CredentialSource>> = Vec::new();

        for name in &config.source_order {
            match name.as_str() {
                "settings" => sources.push(Arc::new(SettingsSource::new(pool.clone()))),
                "legacy" => sources.push(Arc::new(LegacySource::new(pool.clone()))),
                other => {
                    tracing::warn!(source = %other, "Unknown credential source in config, skipping");
                }
            }
        }

        if sources.is_empty() {
            tracing::warn!("No credential sources configured, falling back to settings + legacy");
            sources.push(Arc::new(SettingsSource::new(pool.clone())));
            sources.push(Arc::new(LegacySource::new(pool.clone())));
        }

        Self { sources }
    }

    /// Return the first complete credential match, or `None` when no source
    /// has one. Callers must handle the `None` case explicitly.
    pub async fn resolve(
        &self,
        owner_id: i64,
        channel: Channel,
        forced_account: Option<&str>,
    ) -> Result<Option<Credentials>, CredentialError> {
        for source in &self.sources {
            if let Some(credentials) = source.lookup(owner_id, channel, forced_account).await? {
                tracing::debug!(
                    owner_id = owner_id,
                    channel = %channel,
                    source = %credentials.source,
                    account = %credentials.destination_id,
                    "Credentials resolved"
                );
                return Ok(Some(credentials));
            }
        }

        tracing::debug!(
            owner_id = owner_id,
            channel = %channel,
            "No complete credentials in any source"
        );
        Ok(None)
    }
}
