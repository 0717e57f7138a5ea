pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, resolve_config_path, validate_config};
pub use schema::{
    AppConfig, CollaboratorConfig, DispatchConfig, FingerprintConfig, LoggingConfig, MailboxAuth,
    MailboxConfig, QaConfig, ReplyScoring, TriageConfig,
};
