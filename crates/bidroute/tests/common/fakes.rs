//! Scripted mailboxes, recording collaborators and a counting classifier.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;

use bidroute::config::{FingerprintConfig, MailboxConfig, ReplyScoring};
use bidroute::db::Database;
use bidroute::email::{EmailError, MailTransport, TransportFactory};
use bidroute::error::CollaboratorError;
use bidroute::fingerprint::FingerprintStore;
use bidroute::message::InboundMessage;
use bidroute::pipeline::{Pipeline, SelfSenderFilter};
use bidroute::qa::FixtureActiveItems;
use bidroute::router::{
    Collaborators, CsDraftCollaborator, CsDraftRequest, DispatchQueue, IntakeCollaborator,
    Notifier, OperatorAlert, Router,
};
use bidroute::triage::{
    Classification, Classify, EntityExtractor, EntitySet, IntentClassifier,
    KeywordShippingDetector, PatternTables, ReplyDetector, Triage,
};

/// Server-side state of one scripted mailbox.
#[derive(Default)]
pub struct MailboxState {
    pub uidvalidity: u32,
    pub messages: BTreeMap<u32, Vec<u8>>,
    /// Makes `connect` fail until cleared.
    pub offline: bool,
    pub fetches: Vec<u32>,
    pub connects: usize,
    /// Server-side latency per UID, on the tokio clock.
    pub fetch_delays: BTreeMap<u32, Duration>,
    /// Session steps that never answer.
    pub stalled: Vec<Step>,
    /// Search result order; UID order when unset.
    pub listing: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Examine,
    Search,
}

/// A mailbox shared between the test and every transport it hands out.
#[derive(Clone, Default)]
pub struct ScriptedMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl ScriptedMailbox {
    pub fn new(uidvalidity: u32) -> Self {
        let mailbox = Self::default();
        mailbox.state.lock().unwrap().uidvalidity = uidvalidity;
        mailbox
    }

    pub fn deliver(&self, uid: u32, raw: Vec<u8>) {
        self.state.lock().unwrap().messages.insert(uid, raw);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn set_uidvalidity(&self, uidvalidity: u32) {
        self.state.lock().unwrap().uidvalidity = uidvalidity;
    }

    pub fn delay_fetch(&self, uid: u32, delay: Duration) {
        self.state.lock().unwrap().fetch_delays.insert(uid, delay);
    }

    pub fn stall(&self, step: Step) {
        self.state.lock().unwrap().stalled.push(step);
    }

    pub fn resume(&self) {
        self.state.lock().unwrap().stalled.clear();
    }

    pub fn list_in_order(&self, uids: &[u32]) {
        self.state.lock().unwrap().listing = Some(uids.to_vec());
    }

    fn stalls(&self, step: Step) -> bool {
        self.state.lock().unwrap().stalled.contains(&step)
    }

    pub fn fetches(&self) -> Vec<u32> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(ScriptedFactory {
            mailbox: self.clone(),
        })
    }
}

pub struct ScriptedFactory {
    mailbox: ScriptedMailbox,
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, _config: &MailboxConfig) -> Box<dyn MailTransport> {
        Box::new(ScriptedTransport {
            mailbox: self.mailbox.clone(),
        })
    }
}

pub struct ScriptedTransport {
    mailbox: ScriptedMailbox,
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), EmailError> {
        let offline = {
            let mut state = self.mailbox.state.lock().unwrap();
            state.connects += 1;
            state.offline
        };
        if offline {
            return Err(EmailError::ConnectionFailed("scripted outage".to_string()));
        }
        if self.mailbox.stalls(Step::Connect) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn examine(&mut self, _folder: &str) -> Result<u32, EmailError> {
        if self.mailbox.stalls(Step::Examine) {
            std::future::pending::<()>().await;
        }
        Ok(self.mailbox.state.lock().unwrap().uidvalidity)
    }

    async fn search_since(&mut self, _since: NaiveDate) -> Result<Vec<u32>, EmailError> {
        if self.mailbox.stalls(Step::Search) {
            std::future::pending::<()>().await;
        }
        let state = self.mailbox.state.lock().unwrap();
        Ok(match &state.listing {
            Some(listing) => listing.clone(),
            None => state.messages.keys().copied().collect(),
        })
    }

    async fn fetch_peek(&mut self, uid: u32) -> Result<Vec<u8>, EmailError> {
        let delay = {
            let mut state = self.mailbox.state.lock().unwrap();
            state.fetches.push(uid);
            state.fetch_delays.get(&uid).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.mailbox
            .state
            .lock()
            .unwrap()
            .messages
            .get(&uid)
            .cloned()
            .ok_or_else(|| EmailError::ProtocolError(format!("no message {}", uid)))
    }

    async fn disconnect(&mut self) -> Result<(), EmailError> {
        Ok(())
    }
}

/// Intake that remembers every subject it was handed.
#[derive(Default)]
pub struct RecordingIntake {
    prefix: &'static str,
    subjects: Mutex<Vec<String>>,
}

impl RecordingIntake {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            subjects: Mutex::new(Vec::new()),
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.subjects.lock().unwrap().clone()
    }
}

impl IntakeCollaborator for RecordingIntake {
    fn create(
        &self,
        message: &InboundMessage,
        _entities: &EntitySet,
    ) -> Result<String, CollaboratorError> {
        let mut subjects = self.subjects.lock().unwrap();
        subjects.push(message.subject.clone());
        Ok(format!("{}-{}", self.prefix, subjects.len()))
    }
}

#[derive(Default)]
pub struct RecordingDrafts {
    requests: Mutex<Vec<CsDraftRequest>>,
}

impl RecordingDrafts {
    pub fn requests(&self) -> Vec<CsDraftRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CsDraftCollaborator for RecordingDrafts {
    fn draft(&self, request: &CsDraftRequest) -> Result<String, CollaboratorError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("CS-{}", requests.len()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<OperatorAlert>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<OperatorAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: &OperatorAlert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

/// Handles on every collaborator the router can reach.
pub struct Recorders {
    pub rfq: Arc<RecordingIntake>,
    pub price_checks: Arc<RecordingIntake>,
    pub shipping: Arc<RecordingIntake>,
    pub drafts: Arc<RecordingDrafts>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Recorders {
    pub fn new() -> Self {
        Self {
            rfq: Arc::new(RecordingIntake::new("RFQ")),
            price_checks: Arc::new(RecordingIntake::new("PC")),
            shipping: Arc::new(RecordingIntake::new("SHIP")),
            drafts: Arc::new(RecordingDrafts::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            rfq_intake: self.rfq.clone(),
            price_check_intake: self.price_checks.clone(),
            shipping_store: self.shipping.clone(),
            cs_drafts: self.drafts.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Total hand-offs across every target.
    pub fn dispatched(&self) -> usize {
        self.rfq.subjects().len()
            + self.price_checks.subjects().len()
            + self.shipping.subjects().len()
            + self.drafts.requests().len()
    }

    /// Waits for the dispatch workers to deliver `count` hand-offs.
    pub fn wait_for_dispatched(&self, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.dispatched() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.dispatched() >= count
    }
}

/// Wraps a classifier and counts how often it is consulted.
pub struct CountingClassifier {
    inner: Arc<dyn Classify>,
    calls: AtomicUsize,
}

impl CountingClassifier {
    pub fn new(inner: Arc<dyn Classify>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classify for CountingClassifier {
    fn classify(&self, message: &InboundMessage) -> Classification {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.classify(message)
    }
}

/// A full pipeline over an in-memory database, recording collaborators and
/// the fixture world's open items.
pub struct TestPipeline {
    pub db: Database,
    pub pipeline: Arc<Pipeline>,
    pub classifier: Arc<CountingClassifier>,
    pub recorders: Recorders,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_db(Database::open_in_memory().unwrap(), &[])
    }

    /// Treats mail from `own_domains` as self-sent.
    pub fn with_own_domains(own_domains: &[&str]) -> Self {
        Self::with_db(Database::open_in_memory().unwrap(), own_domains)
    }

    pub fn with_db(db: Database, own_domains: &[&str]) -> Self {
        let recorders = Recorders::new();
        let tables = Arc::new(PatternTables::builtin().unwrap());
        let classifier = Arc::new(CountingClassifier::new(Arc::new(IntentClassifier::new(
            tables.clone(),
            Arc::new(KeywordShippingDetector::new(tables.clone())),
        ))));
        let triage = Arc::new(Triage::new(
            ReplyDetector::new(tables.clone(), ReplyScoring::default()),
            classifier.clone(),
            EntityExtractor::new(tables.clone()),
            Arc::new(FixtureActiveItems::default()),
        ));

        let store = FingerprintStore::new(db.clone(), &FingerprintConfig::default());
        let queue = Arc::new(DispatchQueue::new(
            recorders.collaborators(),
            Some(store.clone()),
            2,
            64,
        ));
        let router = Arc::new(Router::new(store, queue, recorders.notifier.clone()));
        let own_domains: Vec<String> = own_domains.iter().map(|d| d.to_string()).collect();
        let pipeline = Arc::new(Pipeline::new(
            triage,
            router,
            tables,
            SelfSenderFilter::new(&[], &own_domains),
        ));

        Self {
            db,
            pipeline,
            classifier,
            recorders,
        }
    }
}
