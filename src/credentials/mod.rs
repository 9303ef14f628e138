//! Per-tenant delivery credential resolution.
//!
//! Tenants migrate between credential storage schemes over time; the
//! resolver tries an ordered list of sources and stops at the first
//! complete match. Partial data is never merged across sources.

mod resolver;
mod sources;

pub use resolver::CredentialResolver;
pub use sources::{
    CredentialError, CredentialSource, Credentials, LegacySource, SettingsSource, SourceKind,
};
