use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::AppConfig;
use crate::error::ConfigError;
use crate::triage::PatternTables;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "BIDROUTE_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// `$BIDROUTE_CONFIG`, else `~/.bidroute/config.yaml`.
pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bidroute")
        .join("config.yaml")
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for mailbox in &config.mailboxes {
        let invalid = |reason: &str| ConfigError::InvalidMailbox {
            name: mailbox.name.clone(),
            reason: reason.to_string(),
        };

        if mailbox.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !names.insert(mailbox.name.as_str()) {
            return Err(invalid("duplicate mailbox name"));
        }
        if mailbox.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if mailbox.username.trim().is_empty() {
            return Err(invalid("username must not be empty"));
        }
        if !mailbox.use_tls {
            return Err(invalid("TLS is required"));
        }
        if mailbox.poll_interval == 0 {
            return Err(invalid("pollInterval must be positive"));
        }
        if mailbox.batch_size == 0 {
            return Err(invalid("batchSize must be positive"));
        }
        if mailbox.lookback_days == 0 {
            return Err(invalid("lookbackDays must be positive"));
        }
        if mailbox.fetch_timeout_secs == 0 || mailbox.cycle_budget_secs == 0 {
            return Err(invalid("fetchTimeoutSecs and cycleBudgetSecs must be positive"));
        }
        if mailbox.max_backoff_secs < mailbox.poll_interval {
            return Err(invalid("maxBackoffSecs must be at least pollInterval"));
        }
        if mailbox.enabled && !mailbox.secret_source().is_configured() {
            return Err(invalid(
                "one of passwordEnvVar, passwordFile or passwordInsecure is required",
            ));
        }
        if mailbox.lookback_days >= config.cursor_retention_days {
            return Err(ConfigError::Validation {
                message: format!(
                    "cursorRetentionDays ({}) must exceed lookbackDays ({}) of mailbox '{}'",
                    config.cursor_retention_days, mailbox.lookback_days, mailbox.name
                ),
            });
        }
    }

    if let Some(bad) = config.own_addresses.iter().find(|a| !a.contains('@')) {
        return Err(ConfigError::Validation {
            message: format!("ownAddresses entry '{}' is not an email address", bad),
        });
    }
    if let Some(bad) = config
        .own_domains
        .iter()
        .find(|d| d.trim().is_empty() || d.contains('@'))
    {
        return Err(ConfigError::Validation {
            message: format!("ownDomains entry '{}' is not a domain", bad),
        });
    }

    if config.dispatch.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "dispatch.workerCount must be positive".to_string(),
        });
    }
    if config.dispatch.queue_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "dispatch.queueCapacity must be positive".to_string(),
        });
    }
    if config.fingerprint.timestamp_granularity_secs == 0 {
        return Err(ConfigError::Validation {
            message: "fingerprint.timestampGranularitySecs must be positive".to_string(),
        });
    }
    if config.qa.run_history_cap == 0 || config.qa.learned_pattern_cap == 0 {
        return Err(ConfigError::Validation {
            message: "qa history caps must be positive".to_string(),
        });
    }
    if config.qa.trend_window < 2 {
        return Err(ConfigError::Validation {
            message: "qa.trendWindow must be at least 2".to_string(),
        });
    }

    // Every table must compile before anything is watched.
    PatternTables::load(&config.triage)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VALID: &str = r#"
ownAddresses: [sales@supplier.com]
ownDomains: [supplier.com]
mailboxes:
  - name: sales
    host: imap.example.com
    username: sales@supplier.com
    auth:
      passwordEnvVar: SALES_IMAP_PASSWORD
  - name: quotes
    host: imap.example.com
    username: quotes@supplier.com
    lookbackDays: 5
    auth:
      passwordInsecure: hunter2
"#;

    #[test]
    fn test_load_valid_config() {
        let config = load_config_from_str(VALID).unwrap();
        assert_eq!(config.mailboxes.len(), 2);
        let sales = &config.mailboxes[0];
        assert_eq!(sales.port, 993);
        assert_eq!(sales.folder, "INBOX");
        assert_eq!(sales.lookback_days, 3);
        assert_eq!(sales.batch_size, 50);
        assert_eq!(config.mailboxes[1].lookback_days, 5);
        assert_eq!(config.cursor_retention_days, 30);
        assert_eq!(config.triage.reply_scoring.threshold, 2);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = load_config_from_str("{}").unwrap();
        assert!(config.mailboxes.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_password_alias() {
        let yaml = r#"
mailboxes:
  - name: a
    host: h
    username: u
    auth:
      password: secret
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(
            config.mailboxes[0].auth.password_insecure.as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn test_duplicate_mailbox_rejected() {
        let yaml = r#"
mailboxes:
  - {name: a, host: h, username: u, auth: {passwordInsecure: x}}
  - {name: a, host: h, username: v, auth: {passwordInsecure: x}}
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMailbox { .. }));
    }

    #[test]
    fn test_plaintext_rejected() {
        let yaml = r#"
mailboxes:
  - {name: a, host: h, username: u, useTls: false, auth: {passwordInsecure: x}}
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("TLS"));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let yaml = "mailboxes:\n  - {name: a, host: h, username: u}\n";
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn test_disabled_mailbox_needs_no_secret() {
        let yaml = "mailboxes:\n  - {name: a, host: h, username: u, enabled: false}\n";
        assert!(load_config_from_str(yaml).is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let yaml = r#"
mailboxes:
  - {name: a, host: h, username: u, batchSize: 0, auth: {passwordInsecure: x}}
"#;
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn test_retention_must_exceed_lookback() {
        let yaml = r#"
cursorRetentionDays: 3
mailboxes:
  - {name: a, host: h, username: u, auth: {passwordInsecure: x}}
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("cursorRetentionDays"));
    }

    #[test]
    fn test_own_address_needs_at_sign() {
        assert!(load_config_from_str("ownAddresses: [supplier.com]").is_err());
    }

    #[test]
    fn test_missing_patterns_file_rejected() {
        let yaml = "triage:\n  patternsFile: /nonexistent/patterns.yaml\n";
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, VALID).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.mailboxes[0].name, "sales");
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env_override() {
        std::env::set_var(CONFIG_PATH_ENV, "/etc/bidroute.yaml");
        assert_eq!(resolve_config_path(), PathBuf::from("/etc/bidroute.yaml"));
        std::env::remove_var(CONFIG_PATH_ENV);
        assert!(resolve_config_path().ends_with(".bidroute/config.yaml"));
    }
}
