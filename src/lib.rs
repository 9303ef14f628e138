// Infrastructure layer (shared components)
pub mod config;
pub mod db;
pub mod error;

// Domain layer (business logic)
pub mod credentials;
pub mod dispatch;
pub mod message;
pub mod template;

// Application layer
pub mod worker;

// Supporting modules
pub mod tasks;
