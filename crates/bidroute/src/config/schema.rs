//! Configuration file schema (`config.yaml`).

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// SQLite file for fingerprints, cursors and the QA ledger.
    /// Defaults to `~/.bidroute/data/bidroute.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// The supplier's own addresses. Mail from these is never triaged.
    #[serde(default)]
    pub own_addresses: Vec<String>,

    /// The supplier's own domains, matched against the sender's domain.
    #[serde(default)]
    pub own_domains: Vec<String>,

    #[serde(default)]
    pub mailboxes: Vec<MailboxConfig>,

    #[serde(default)]
    pub triage: TriageConfig,

    #[serde(default)]
    pub fingerprint: FingerprintConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub qa: QaConfig,

    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// Cursor rows older than this many days are eligible for pruning.
    #[serde(default = "default_cursor_retention_days")]
    pub cursor_retention_days: u32,
}

fn default_cursor_retention_days() -> u32 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            logging: LoggingConfig::default(),
            own_addresses: Vec::new(),
            own_domains: Vec::new(),
            mailboxes: Vec::new(),
            triage: TriageConfig::default(),
            fingerprint: FingerprintConfig::default(),
            dispatch: DispatchConfig::default(),
            qa: QaConfig::default(),
            collaborators: CollaboratorConfig::default(),
            cursor_retention_days: default_cursor_retention_days(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// One watched IMAP mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxConfig {
    /// Unique name; scopes the cursor and appears in logs.
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// IMAP server hostname (e.g., "imap.gmail.com").
    pub host: String,

    /// IMAP server port (default: 993 for IMAPS).
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Whether to use TLS (required).
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Login name (typically the address).
    pub username: String,

    #[serde(default)]
    pub auth: MailboxAuth,

    /// Folder to examine (default: "INBOX").
    #[serde(default = "default_inbox")]
    pub folder: String,

    /// Days of history searched each cycle, read or unread (default: 3).
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Poll interval in seconds (default: 300).
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Maximum messages handled per cycle (default: 50).
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Per-message fetch timeout in seconds (default: 30).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Wall-clock budget for one poll cycle in seconds (default: 120).
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget_secs: u64,

    /// Upper bound for the back-off delay after transport failures (default: 3600).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_imap_port() -> u16 {
    993
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

fn default_lookback_days() -> u32 {
    3
}

fn default_poll_interval() -> u64 {
    300 // 5 minutes
}

fn default_batch_size() -> u32 {
    50
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_cycle_budget() -> u64 {
    120
}

fn default_max_backoff() -> u64 {
    3600
}

impl MailboxConfig {
    /// Credential sources for this mailbox.
    pub fn secret_source(&self) -> SecretSource<'_> {
        SecretSource {
            inline: self.auth.password_insecure.as_deref(),
            file: self.auth.password_file.as_deref(),
            env_var: self.auth.password_env_var.as_deref(),
        }
    }
}

/// Password authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxAuth {
    /// Environment variable containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,

    /// Inline password. Prefer `passwordEnvVar` or `passwordFile`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "passwordInsecure",
        alias = "password"
    )]
    pub password_insecure: Option<String>,

    /// File containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,
}

/// Triage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageConfig {
    /// Replaces the built-in pattern tables when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns_file: Option<String>,

    #[serde(default)]
    pub reply_scoring: ReplyScoring,
}

/// Weights for the reply/follow-up body score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyScoring {
    /// Characters of the body considered.
    #[serde(default = "default_body_window")]
    pub body_window_chars: usize,

    /// Non-quoted text shorter than this earns `short_body_points`.
    #[serde(default = "default_short_body_chars")]
    pub short_body_chars: usize,

    #[serde(default = "default_short_body_points")]
    pub short_body_points: i32,

    /// Awarded once when any reply phrase matches.
    #[serde(default = "default_phrase_points")]
    pub phrase_points: i32,

    /// Awarded when the message carries no relevant attachment.
    #[serde(default = "default_no_attachment_points")]
    pub no_attachment_points: i32,

    /// Subtracted once when non-quoted text reads like new business.
    #[serde(default = "default_new_business_penalty")]
    pub new_business_penalty: i32,

    /// Minimum score for a follow-up.
    #[serde(default = "default_reply_threshold")]
    pub threshold: i32,
}

fn default_body_window() -> usize {
    1500
}

fn default_short_body_chars() -> usize {
    300
}

fn default_short_body_points() -> i32 {
    3
}

fn default_phrase_points() -> i32 {
    2
}

fn default_no_attachment_points() -> i32 {
    2
}

fn default_new_business_penalty() -> i32 {
    3
}

fn default_reply_threshold() -> i32 {
    2
}

impl Default for ReplyScoring {
    fn default() -> Self {
        Self {
            body_window_chars: default_body_window(),
            short_body_chars: default_short_body_chars(),
            short_body_points: default_short_body_points(),
            phrase_points: default_phrase_points(),
            no_attachment_points: default_no_attachment_points(),
            new_business_penalty: default_new_business_penalty(),
            threshold: default_reply_threshold(),
        }
    }
}

/// Fingerprint store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintConfig {
    /// Receipt timestamps are truncated to this many seconds.
    #[serde(default = "default_granularity")]
    pub timestamp_granularity_secs: u32,

    /// Entries in the process-local known-fingerprint cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_granularity() -> u32 {
    60
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            timestamp_granularity_secs: default_granularity(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Background dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Worker threads draining the queue (default: CPU count).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Pending tasks allowed before dispatch fails fast.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 8)
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// QA ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaConfig {
    #[serde(default = "default_run_history_cap")]
    pub run_history_cap: usize,

    #[serde(default = "default_learned_pattern_cap")]
    pub learned_pattern_cap: usize,

    /// Runs considered by the trend report.
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,

    /// Score difference between halves that counts as a change.
    #[serde(default = "default_trend_margin")]
    pub trend_margin: f64,
}

fn default_run_history_cap() -> usize {
    100
}

fn default_learned_pattern_cap() -> usize {
    200
}

fn default_trend_window() -> usize {
    10
}

fn default_trend_margin() -> f64 {
    5.0
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            run_history_cap: default_run_history_cap(),
            learned_pattern_cap: default_learned_pattern_cap(),
            trend_window: default_trend_window(),
            trend_margin: default_trend_margin(),
        }
    }
}

/// Where the built-in downstream collaborators keep their state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorConfig {
    /// Directory for the JSON-lines intake journals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_dir: Option<String>,

    /// JSON file mapping sender address to open items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_items_file: Option<String>,
}
