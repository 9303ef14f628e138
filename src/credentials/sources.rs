use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::message::Channel;

/// Errors from credential lookups.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Which storage scheme produced a credential set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Settings,
    Legacy,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Settings => "settings",
            SourceKind::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport credentials resolved for one dispatch attempt.
///
/// Never persisted beyond the attempt.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Sending-account id on the platform (e.g. page id)
    pub destination_id: String,
    /// Bearer token for the transport call
    pub access_token: String,
    /// Secret used to compute the request-signing proof, when configured
    pub app_secret: Option<String>,
    /// Scheme that produced this set
    pub source: SourceKind,
}

/// One credential storage scheme.
///
/// A source is "complete" only when it yields both a token and an account
/// id; anything less is skipped so the resolver can fall through.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn lookup(
        &self,
        owner_id: i64,
        channel: Channel,
        forced_account: Option<&str>,
    ) -> Result<Option<Credentials>, CredentialError>;
}

/// Tenant-scoped structured settings, keyed by channel
/// (`<channel>.access_token` / `<channel>.account_id` / `<channel>.app_secret`).
pub struct SettingsSource {
    pool: SqlitePool,
}

impl SettingsSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn value(&self, owner_id: i64, key: &str) -> Result<Option<String>, CredentialError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM tenant_settings WHERE owner_id = ? AND key = ?",
        )
        .bind(owner_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.filter(|v| !v.trim().is_empty()))
    }

    /// Settings key, falling back to the channel's legacy alias.
    async fn keyed_value(
        &self,
        owner_id: i64,
        channel: Channel,
        suffix: &str,
    ) -> Result<Option<String>, CredentialError> {
        if let Some(v) = self
            .value(owner_id, &format!("{}.{}", channel.as_str(), suffix))
            .await?
        {
            return Ok(Some(v));
        }
        // Older tenants stored messenger credentials under fb_* keys
        if channel == Channel::Messenger {
            let alias = match suffix {
                "access_token" => Some("fb_access_token"),
                "account_id" => Some("fb_page_id"),
                "app_secret" => Some("fb_app_secret"),
                _ => None,
            };
            if let Some(alias) = alias {
                return self.value(owner_id, alias).await;
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CredentialSource for SettingsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Settings
    }

    async fn lookup(
        &self,
        owner_id: i64,
        channel: Channel,
        forced_account: Option<&str>,
    ) -> Result<Option<Credentials>, CredentialError> {
        let token = self.keyed_value(owner_id, channel, "access_token").await?;
        let account = self.keyed_value(owner_id, channel, "account_id").await?;

        // Both token and account id must be present to be complete
        let (Some(access_token), Some(destination_id)) = (token, account) else {
            return Ok(None);
        };

        if let Some(forced) = forced_account {
            if forced != destination_id {
                return Ok(None);
            }
        }

        let app_secret = self.keyed_value(owner_id, channel, "app_secret").await?;

        Ok(Some(Credentials {
            destination_id,
            access_token,
            app_secret,
            source: SourceKind::Settings,
        }))
    }
}

/// Legacy per-tenant credential table, optionally filtered by a forced
/// account id. Newest row wins.
pub struct LegacySource {
    pool: SqlitePool,
}

impl LegacySource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialSource for LegacySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Legacy
    }

    async fn lookup(
        &self,
        owner_id: i64,
        _channel: Channel,
        forced_account: Option<&str>,
    ) -> Result<Option<Credentials>, CredentialError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>)>(
            r#"
            SELECT account_id, access_token, app_secret
            FROM platform_credentials
            WHERE owner_id = ? AND (? IS NULL OR account_id = ?)
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(forced_account)
        .bind(forced_account)
        .fetch_optional(&self.pool)
        .await?;

        let Some((account_id, access_token, app_secret)) = row else {
            return Ok(None);
        };

        if account_id.trim().is_empty() || access_token.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(Credentials {
            destination_id: account_id,
            access_token,
            app_secret: app_secret.filter(|s| !s.trim().is_empty()),
            source: SourceKind::Legacy,
        }))
    }
}
