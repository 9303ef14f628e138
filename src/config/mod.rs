mod settings;

pub use settings::{
    CredentialsConfig, DatabaseConfig, RetryConfig, Settings, TransportConfig, WorkerConfig,
};
