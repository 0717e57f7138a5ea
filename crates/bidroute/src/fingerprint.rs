//! At-most-once processing via content fingerprints.
//!
//! A fingerprint is mailbox-agnostic: the same message delivered to two
//! watched mailboxes produces the same digest, and only the first watcher to
//! record it gets to route it.

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info};
use moka::sync::Cache;
use sha2::{Digest, Sha256};

use crate::config::FingerprintConfig;
use crate::db::fingerprint_repo::{self, CorrectionRow, FingerprintRow};
use crate::db::{format_timestamp, Database, DatabaseError};
use crate::message::extract_email_address;
use crate::sanitize::short_fingerprint;
use crate::triage::Category;

/// Hex SHA-256 digest identifying one logical message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a digest read back from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, whitespace collapsed, trimmed.
pub fn normalize_subject(subject: &str) -> String {
    subject
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Bare address, lowercased. Falls back to the trimmed input.
pub fn normalize_sender(sender: &str) -> String {
    extract_email_address(sender).unwrap_or_else(|| sender.trim().to_lowercase())
}

/// Unix seconds rounded down to a multiple of `granularity_secs`.
pub fn truncate_timestamp(at: DateTime<Utc>, granularity_secs: u32) -> i64 {
    let secs = at.timestamp();
    let g = i64::from(granularity_secs.max(1));
    secs - secs.rem_euclid(g)
}

pub fn compute_fingerprint(
    subject: &str,
    sender: &str,
    received_at: DateTime<Utc>,
    granularity_secs: u32,
) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(normalize_subject(subject).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_sender(sender).as_bytes());
    hasher.update([0x1f]);
    hasher.update(truncate_timestamp(received_at, granularity_secs).to_string().as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Durable fingerprint registry shared by all watchers.
#[derive(Clone)]
pub struct FingerprintStore {
    db: Database,
    granularity_secs: u32,
    /// Fingerprints known to exist. Only ever short-circuits duplicates.
    known: Cache<String, ()>,
}

impl FingerprintStore {
    pub fn new(db: Database, config: &FingerprintConfig) -> Self {
        Self {
            db,
            granularity_secs: config.timestamp_granularity_secs,
            known: Cache::new(config.cache_capacity),
        }
    }

    pub fn fingerprint(&self, subject: &str, sender: &str, received_at: DateTime<Utc>) -> Fingerprint {
        compute_fingerprint(subject, sender, received_at, self.granularity_secs)
    }

    /// Records the message and returns `true` only for the first caller.
    pub fn check_and_record(
        &self,
        subject: &str,
        sender: &str,
        received_at: DateTime<Utc>,
        origin_mailbox: &str,
    ) -> Result<bool, DatabaseError> {
        let fingerprint = self.fingerprint(subject, sender, received_at);
        self.record(&fingerprint, origin_mailbox)
    }

    /// Records a precomputed fingerprint. `true` means this call created it.
    pub fn record(&self, fingerprint: &Fingerprint, origin_mailbox: &str) -> Result<bool, DatabaseError> {
        self.insert(fingerprint, origin_mailbox, None)
    }

    /// Records a fingerprint together with its routed category in one write,
    /// so a new row never exists without the category it was routed under.
    pub fn record_classified(
        &self,
        fingerprint: &Fingerprint,
        origin_mailbox: &str,
        category: Category,
    ) -> Result<bool, DatabaseError> {
        self.insert(fingerprint, origin_mailbox, Some(category))
    }

    fn insert(
        &self,
        fingerprint: &Fingerprint,
        origin_mailbox: &str,
        category: Option<Category>,
    ) -> Result<bool, DatabaseError> {
        if self.known.contains_key(fingerprint.as_str()) {
            debug!("Fingerprint {} known from cache", short_fingerprint(fingerprint.as_str()));
            return Ok(false);
        }

        let is_new = fingerprint_repo::insert_classified_if_absent(
            &self.db,
            fingerprint.as_str(),
            origin_mailbox,
            category.map(|c| c.as_str()),
            &format_timestamp(Utc::now()),
        )?;
        self.known.insert(fingerprint.as_str().to_string(), ());

        if !is_new {
            debug!(
                "Fingerprint {} already recorded",
                short_fingerprint(fingerprint.as_str())
            );
        }
        Ok(is_new)
    }

    /// Whether the fingerprint has been recorded. Never consults only the cache
    /// for a negative answer.
    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, DatabaseError> {
        if self.known.contains_key(fingerprint.as_str()) {
            return Ok(true);
        }
        let exists = fingerprint_repo::exists(&self.db, fingerprint.as_str())?;
        if exists {
            self.known.insert(fingerprint.as_str().to_string(), ());
        }
        Ok(exists)
    }

    /// Writes the routed category. The first write wins; returns whether this
    /// call wrote it.
    pub fn finalize(&self, fingerprint: &Fingerprint, category: Category) -> Result<bool, DatabaseError> {
        fingerprint_repo::set_category_if_unset(&self.db, fingerprint.as_str(), category.as_str())
    }

    /// Attaches the downstream record id once it is known.
    pub fn attach_result(&self, fingerprint: &Fingerprint, result_id: &str) -> Result<bool, DatabaseError> {
        fingerprint_repo::set_result_id_if_empty(&self.db, fingerprint.as_str(), result_id)
    }

    /// Manually reclassifies a routed message, leaving an audit row.
    /// Returns `false` when the fingerprint is unknown.
    pub fn correct(
        &self,
        fingerprint: &Fingerprint,
        category: Category,
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        let previous = fingerprint_repo::correct_category(
            &self.db,
            fingerprint.as_str(),
            category.as_str(),
            reason,
            &format_timestamp(Utc::now()),
        )?;

        match previous {
            Some(previous) => {
                info!(
                    "Fingerprint {} corrected from {} to {}: {}",
                    short_fingerprint(fingerprint.as_str()),
                    previous.as_deref().unwrap_or("<none>"),
                    category,
                    reason
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn find(&self, fingerprint: &Fingerprint) -> Result<Option<FingerprintRow>, DatabaseError> {
        fingerprint_repo::find(&self.db, fingerprint.as_str())
    }

    pub fn corrections(&self, fingerprint: &Fingerprint) -> Result<Vec<CorrectionRow>, DatabaseError> {
        fingerprint_repo::find_corrections(&self.db, fingerprint.as_str())
    }

    pub fn stats(&self) -> Result<FingerprintStats, DatabaseError> {
        Ok(FingerprintStats {
            total: fingerprint_repo::count_all(&self.db)?,
            pending: fingerprint_repo::count_pending(&self.db)?,
            by_category: fingerprint_repo::count_by_category(&self.db)?,
            cached: self.known.entry_count(),
        })
    }
}

/// Counts over the fingerprint table.
#[derive(Debug)]
pub struct FingerprintStats {
    pub total: u64,
    /// Recorded without a category, through `record` or `check_and_record`.
    pub pending: u64,
    pub by_category: Vec<(String, u64)>,
    /// Approximate; the cache applies inserts lazily.
    pub cached: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> FingerprintStore {
        let db = Database::open_in_memory().expect("Failed to create test database");
        FingerprintStore::new(db, &FingerprintConfig::default())
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 19, h, m, s).unwrap()
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_subject("  Quote -   Med\tOS  "), "quote - med os");
        assert_eq!(
            normalize_sender("Valentina <Valentina.Demidenko@CDCR.ca.gov>"),
            "valentina.demidenko@cdcr.ca.gov"
        );
        assert_eq!(truncate_timestamp(at(10, 0, 59), 60), at(10, 0, 0).timestamp());
    }

    #[test]
    fn test_fingerprint_is_stable_within_granularity() {
        let a = compute_fingerprint("Quote - Med OS", "a@b.gov", at(10, 0, 5), 60);
        let b = compute_fingerprint("quote -  med os ", "A@B.gov", at(10, 0, 55), 60);
        let c = compute_fingerprint("Quote - Med OS", "a@b.gov", at(10, 1, 5), 60);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_check_and_record_is_idempotent() {
        let store = store();
        assert!(store.check_and_record("Quote", "a@b.gov", at(10, 0, 0), "inbox").unwrap());
        assert!(!store.check_and_record("Quote", "a@b.gov", at(10, 0, 0), "inbox").unwrap());
    }

    #[test]
    fn test_dedup_across_mailboxes_and_store_instances() {
        let db = Database::open_in_memory().unwrap();
        let first = FingerprintStore::new(db.clone(), &FingerprintConfig::default());
        let second = FingerprintStore::new(db, &FingerprintConfig::default());

        assert!(first.check_and_record("Quote", "a@b.gov", at(10, 0, 0), "sales").unwrap());
        // Separate cache, same table.
        assert!(!second.check_and_record("Quote", "a@b.gov", at(10, 0, 0), "quotes").unwrap());

        let fp = first.fingerprint("Quote", "a@b.gov", at(10, 0, 0));
        assert_eq!(first.find(&fp).unwrap().unwrap().origin_mailbox, "sales");
    }

    #[test]
    fn test_finalize_is_write_once() {
        let store = store();
        let fp = store.fingerprint("Quote", "a@b.gov", at(10, 0, 0));
        store.record(&fp, "inbox").unwrap();

        assert!(store.finalize(&fp, Category::PriceCheck).unwrap());
        assert!(!store.finalize(&fp, Category::FormalRfq).unwrap());
        assert_eq!(
            store.find(&fp).unwrap().unwrap().result_category.as_deref(),
            Some("price_check")
        );
    }

    #[test]
    fn test_record_classified_writes_category_with_row() {
        let store = store();
        let fp = store.fingerprint("Quote", "a@b.gov", at(10, 0, 0));

        assert!(store.record_classified(&fp, "inbox", Category::PriceCheck).unwrap());
        assert!(!store.record_classified(&fp, "sales", Category::FormalRfq).unwrap());

        let row = store.find(&fp).unwrap().unwrap();
        assert_eq!(row.result_category.as_deref(), Some("price_check"));
        assert_eq!(row.origin_mailbox, "inbox");
        assert_eq!(store.stats().unwrap().pending, 0);
    }

    #[test]
    fn test_attach_result_once() {
        let store = store();
        let fp = store.fingerprint("Quote", "a@b.gov", at(10, 0, 0));
        store.record(&fp, "inbox").unwrap();
        assert!(store.attach_result(&fp, "PC-001").unwrap());
        assert!(!store.attach_result(&fp, "PC-002").unwrap());
        assert_eq!(store.find(&fp).unwrap().unwrap().result_id, "PC-001");
    }

    #[test]
    fn test_correct_writes_audit_row() {
        let store = store();
        let fp = store.fingerprint("Quote", "a@b.gov", at(10, 0, 0));
        store.record(&fp, "inbox").unwrap();
        store.finalize(&fp, Category::Unknown).unwrap();

        assert!(store.correct(&fp, Category::PriceCheck, "operator review").unwrap());
        let corrections = store.corrections(&fp).unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].previous_category.as_deref(), Some("unknown"));
        assert_eq!(corrections[0].corrected_category, "price_check");

        let missing = Fingerprint::from_hex("00");
        assert!(!store.correct(&missing, Category::Recall, "x").unwrap());
    }

    #[test]
    fn test_contains_goes_to_database_on_miss() {
        let db = Database::open_in_memory().unwrap();
        let writer = FingerprintStore::new(db.clone(), &FingerprintConfig::default());
        let reader = FingerprintStore::new(db, &FingerprintConfig::default());
        let fp = writer.fingerprint("Quote", "a@b.gov", at(10, 0, 0));

        assert!(!reader.contains(&fp).unwrap());
        writer.record(&fp, "inbox").unwrap();
        assert!(reader.contains(&fp).unwrap());
    }

    #[test]
    fn test_stats() {
        let store = store();
        let a = store.fingerprint("A", "a@b.gov", at(10, 0, 0));
        let b = store.fingerprint("B", "a@b.gov", at(10, 0, 0));
        store.record(&a, "inbox").unwrap();
        store.record(&b, "inbox").unwrap();
        store.finalize(&a, Category::Recall).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.by_category, vec![("recall".to_string(), 1)]);
    }
}
