//! Read-only view of CRM client records.
//!
//! The engine never owns client data; it only needs a phone/email lookup
//! for address-based channels.

use async_trait::async_trait;
use sqlx::SqlitePool;

/// Contact details on file for a client.
#[derive(Debug, Clone, Default)]
pub struct ClientContact {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ClientContact {
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref().filter(|p| !p.trim().is_empty())
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Tenant-scoped client contact lookup.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn contact(
        &self,
        owner_id: i64,
        client_id: i64,
    ) -> Result<Option<ClientContact>, sqlx::Error>;
}

/// Directory backed by the panel's `clients` table.
pub struct SqlClientDirectory {
    pool: SqlitePool,
}

impl SqlClientDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientDirectory for SqlClientDirectory {
    async fn contact(
        &self,
        owner_id: i64,
        client_id: i64,
    ) -> Result<Option<ClientContact>, sqlx::Error> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT phone, email FROM clients WHERE owner_id = ? AND id = ?",
        )
        .bind(owner_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(phone, email)| ClientContact { phone, email }))
    }
}
