use thiserror::Error;

/// Top-level error type for the dispatch engine.
///
/// Domain modules define their own error enums; this type exists so the
/// binary and library consumers can hold any of them behind one `Result`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] crate::message::StoreError),

    #[error("Credential error: {0}")]
    Credentials(#[from] crate::credentials::CredentialError),

    #[error("Template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::dispatch::TransportError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, AppError>;
