use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BidrouteError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Mailbox error: {0}")]
    Email(#[from] crate::email::EmailError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),

    #[error("Signal handler setup failed: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Failed to spawn watcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid pattern in '{table}': {reason}")]
    InvalidPattern { table: String, reason: String },

    #[error("Invalid mailbox '{name}': {reason}")]
    InvalidMailbox { name: String, reason: String },
}

/// Failure to hand a routed message to the dispatch queue.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatch queue is full ({capacity} pending tasks)")]
    QueueFull { capacity: usize },

    #[error("Dispatch queue is closed")]
    ChannelClosed,
}

/// Failure reported by a downstream collaborator.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("{collaborator} is unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },

    #[error("{collaborator} rejected the request: {reason}")]
    Rejected {
        collaborator: &'static str,
        reason: String,
    },

    #[error("IO error in {collaborator}: {source}")]
    Io {
        collaborator: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error in {collaborator}: {source}")]
    Serialization {
        collaborator: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, BidrouteError>;
