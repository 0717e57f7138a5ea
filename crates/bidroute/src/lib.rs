pub mod app;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod fingerprint;
pub mod message;
pub mod pipeline;
pub mod qa;
pub mod router;
pub mod sanitize;
pub mod scheduler;
pub mod secrets;
pub mod telemetry;
pub mod triage;

pub use app::{App, RunningWatchers};
pub use config::{load_config, AppConfig, MailboxConfig};
pub use db::{Database, DatabaseError};
pub use email::{EmailError, ImapTransportFactory, MailTransport, MailboxWatcher, PollReport, TransportFactory};
pub use error::{BidrouteError, CollaboratorError, ConfigError, DispatchError, Result};
pub use fingerprint::{Fingerprint, FingerprintStore};
pub use message::InboundMessage;
pub use pipeline::{Pipeline, PipelineOutcome, SelfSenderFilter};
pub use qa::{AuditReport, QaHarness, ScoreReport};
pub use router::{Disposition, Router, RoutingOutcome};
pub use scheduler::WatcherScheduler;
pub use secrets::{SecretError, SecretSource};
pub use triage::{Category, Decision, Triage};
