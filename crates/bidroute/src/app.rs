//! Wires config, storage, triage, routing and watchers into one process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::db::{default_database_path, Database};
use crate::email::{prune_cursor, MailboxWatcher, TransportFactory};
use crate::error::{BidrouteError, ConfigError, Result};
use crate::fingerprint::FingerprintStore;
use crate::pipeline::{Pipeline, SelfSenderFilter};
use crate::qa::{AuditReport, DownstreamState, QaHarness};
use crate::router::{
    Collaborators, DispatchQueue, DispatchResult, FileActiveItems, JournalIntake, JournalQueue,
    LogNotifier, Router,
};
use crate::scheduler::WatcherScheduler;
use crate::secrets::expand_home;
use crate::triage::{ActiveItemLookup, NoActiveItems, PatternTables, Triage};

/// A scheduler plus the thread running it.
pub struct RunningWatcher {
    pub scheduler: WatcherScheduler,
    pub handle: JoinHandle<()>,
}

/// Every enabled mailbox being watched, sharing one manual trigger.
pub struct RunningWatchers {
    watchers: Vec<RunningWatcher>,
    trigger: broadcast::Sender<()>,
}

impl RunningWatchers {
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &WatcherScheduler> {
        self.watchers.iter().map(|w| &w.scheduler)
    }

    /// Sweeps every mailbox now, ignoring back-off.
    pub fn trigger_sweep(&self) {
        // No receivers only once every loop has exited.
        let _ = self.trigger.send(());
    }

    /// Stops every loop and joins its thread.
    pub fn stop(self) {
        for running in &self.watchers {
            running.scheduler.stop();
        }
        let _ = self.trigger.send(());

        for running in self.watchers {
            let name = running.scheduler.name().to_string();
            if running.handle.join().is_err() {
                error!("Watcher thread for '{}' panicked", name);
            }
        }
    }
}

pub struct App {
    config: AppConfig,
    db: Database,
    journal_dir: PathBuf,
    queue: Arc<DispatchQueue>,
    pipeline: Arc<Pipeline>,
    qa: QaHarness,
}

impl App {
    /// Opens the database and wires the built-in collaborators: JSON-lines
    /// journals for every downstream queue, a logging notifier and the
    /// optional active-items file.
    pub fn build(config: AppConfig) -> Result<Self> {
        let db_path = match &config.database_path {
            Some(path) => PathBuf::from(expand_home(path)),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "cannot determine home directory for the database; set databasePath"
                    .to_string(),
            })?,
        };
        info!("Opening database at {}", db_path.display());
        let db = Database::open(&db_path)?;

        let journal_dir = journal_dir(&config)?;
        let collaborators = journal_collaborators(&journal_dir)?;

        let lookup: Arc<dyn ActiveItemLookup> = match &config.collaborators.active_items_file {
            Some(path) => {
                let items = FileActiveItems::load(Path::new(&expand_home(path)))?;
                info!("Loaded active items for {} senders", items.len());
                Arc::new(items)
            }
            None => Arc::new(NoActiveItems),
        };

        Self::build_with(config, db, journal_dir, collaborators, lookup)
    }

    /// Wires the pipeline over caller-supplied storage and collaborators.
    pub fn build_with(
        config: AppConfig,
        db: Database,
        journal_dir: PathBuf,
        collaborators: Collaborators,
        lookup: Arc<dyn ActiveItemLookup>,
    ) -> Result<Self> {
        let tables = Arc::new(PatternTables::load(&config.triage)?);
        let store = FingerprintStore::new(db.clone(), &config.fingerprint);
        let notifier = collaborators.notifier.clone();

        let queue = Arc::new(DispatchQueue::new(
            collaborators,
            Some(store.clone()),
            config.dispatch.worker_count.max(1),
            config.dispatch.queue_capacity.max(1),
        ));
        let router = Arc::new(Router::new(store, Arc::clone(&queue), notifier));
        let triage = Arc::new(Triage::from_tables(
            tables.clone(),
            config.triage.reply_scoring.clone(),
            lookup,
        ));
        let pipeline = Arc::new(Pipeline::new(
            triage.clone(),
            router,
            tables.clone(),
            SelfSenderFilter::new(&config.own_addresses, &config.own_domains),
        ));
        let qa = QaHarness::new(
            db.clone(),
            tables,
            config.triage.reply_scoring.clone(),
            triage,
            config.qa.clone(),
        );

        Ok(Self {
            config,
            db,
            journal_dir,
            queue,
            pipeline,
            qa,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn qa(&self) -> &QaHarness {
        &self.qa
    }

    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }

    /// A watcher for one configured mailbox, or `None` if the name is unknown.
    pub fn watcher(&self, mailbox: &str, factory: Arc<dyn TransportFactory>) -> Option<MailboxWatcher> {
        self.config
            .mailboxes
            .iter()
            .find(|m| m.name == mailbox)
            .map(|m| MailboxWatcher::new(m.clone(), self.db.clone(), factory, self.pipeline.clone()))
    }

    /// Starts a scheduler thread for every enabled mailbox.
    pub fn start(&self, factory: Arc<dyn TransportFactory>) -> Result<RunningWatchers> {
        let (trigger, _) = broadcast::channel(16);
        let mut watchers = Vec::new();

        for mailbox in self.config.mailboxes.iter().filter(|m| m.enabled) {
            let watcher = MailboxWatcher::new(
                mailbox.clone(),
                self.db.clone(),
                factory.clone(),
                self.pipeline.clone(),
            );
            let scheduler = WatcherScheduler::new(
                mailbox.name.clone(),
                Duration::from_secs(mailbox.poll_interval.max(1)),
            );
            let handle = scheduler.start(watcher, trigger.subscribe())?;
            info!(
                "Watching mailbox '{}' every {}s",
                mailbox.name, mailbox.poll_interval
            );
            watchers.push(RunningWatcher { scheduler, handle });
        }

        if watchers.is_empty() {
            warn!("No enabled mailboxes configured");
        }

        Ok(RunningWatchers { watchers, trigger })
    }

    /// Drops cursor rows past the retention window.
    pub fn prune_cursor(&self) -> Result<u64> {
        Ok(prune_cursor(
            &self.db,
            self.config.cursor_retention_days,
            Utc::now(),
        )?)
    }

    /// Dispatch results waiting to be read; failures were already alerted.
    pub fn drain_results(&self) -> Vec<DispatchResult> {
        std::iter::from_fn(|| self.queue.try_recv_result()).collect()
    }

    /// Re-reads every enabled mailbox's lookback window and checks that each
    /// actionable message reached its downstream queue.
    pub async fn audit(&self, factory: Arc<dyn TransportFactory>) -> Result<AuditReport> {
        let mut messages = Vec::new();
        for mailbox in self.config.mailboxes.iter().filter(|m| m.enabled) {
            let watcher = MailboxWatcher::new(
                mailbox.clone(),
                self.db.clone(),
                factory.clone(),
                self.pipeline.clone(),
            );
            messages.extend(watcher.snapshot().await?);
        }

        let state = DownstreamState::from_journal(&self.journal_dir)?;
        Ok(self.qa.audit_snapshot(&messages, &state)?)
    }

    /// Waits for queued dispatches to finish. Call after every watcher
    /// built from this app has stopped.
    pub fn shutdown(self) {
        let Self {
            pipeline, queue, ..
        } = self;
        drop(pipeline);

        match Arc::try_unwrap(queue) {
            Ok(queue) => queue.wait(),
            Err(queue) => {
                warn!("Dispatch queue still shared at shutdown; abandoning queued tasks");
                queue.shutdown();
            }
        }
    }
}

fn journal_dir(config: &AppConfig) -> Result<PathBuf> {
    match &config.collaborators.journal_dir {
        Some(dir) => Ok(PathBuf::from(expand_home(dir))),
        None => dirs::home_dir()
            .map(|h| h.join(".bidroute").join("journal"))
            .ok_or_else(|| {
                BidrouteError::Config(ConfigError::Validation {
                    message: "cannot determine home directory for the journal; set collaborators.journalDir"
                        .to_string(),
                })
            }),
    }
}

/// Journal-backed intake for every queue, plus the logging notifier.
pub fn journal_collaborators(dir: &Path) -> Result<Collaborators> {
    Ok(Collaborators {
        rfq_intake: Arc::new(JournalIntake::new(dir, JournalQueue::Rfq)?),
        price_check_intake: Arc::new(JournalIntake::new(dir, JournalQueue::PriceCheck)?),
        shipping_store: Arc::new(JournalIntake::new(dir, JournalQueue::Shipping)?),
        cs_drafts: Arc::new(JournalIntake::new(dir, JournalQueue::CsDrafts)?),
        notifier: Arc::new(LogNotifier),
    })
}
