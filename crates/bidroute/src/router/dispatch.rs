//! Bounded dispatch queue drained by a pool of worker threads.
//!
//! Routing never blocks on downstream systems: tasks are handed over with
//! `try_send`, and a full queue is reported to the caller immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{CollaboratorError, DispatchError};
use crate::fingerprint::{Fingerprint, FingerprintStore};
use crate::message::InboundMessage;
use crate::triage::EntitySet;

use super::collaborators::{AlertKind, AlertLevel, Collaborators, CsDraftRequest, OperatorAlert};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTarget {
    RfqIntake,
    PriceCheckIntake,
    ShippingStore,
    CsDraft,
}

impl DispatchTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchTarget::RfqIntake => "rfq_intake",
            DispatchTarget::PriceCheckIntake => "price_check_intake",
            DispatchTarget::ShippingStore => "shipping_store",
            DispatchTarget::CsDraft => "cs_draft",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskPayload {
    Intake {
        message: InboundMessage,
        entities: EntitySet,
    },
    CsDraft(CsDraftRequest),
}

#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub id: Uuid,
    pub target: DispatchTarget,
    /// Present for fingerprinted messages; receives the downstream record id.
    pub fingerprint: Option<Fingerprint>,
    pub payload: TaskPayload,
}

impl DispatchTask {
    pub fn new(target: DispatchTarget, fingerprint: Option<Fingerprint>, payload: TaskPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            fingerprint,
            payload,
        }
    }

    pub fn message(&self) -> &InboundMessage {
        match &self.payload {
            TaskPayload::Intake { message, .. } => message,
            TaskPayload::CsDraft(request) => &request.message,
        }
    }
}

/// Outcome of one dispatched task.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub task_id: Uuid,
    pub target: DispatchTarget,
    pub mailbox: String,
    pub uid: u32,
    pub success: bool,
    pub record_id: Option<String>,
    pub error: Option<String>,
}

pub struct DispatchQueue {
    task_sender: Sender<DispatchTask>,
    result_receiver: Receiver<DispatchResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    capacity: usize,
}

impl DispatchQueue {
    /// Starts `worker_count` workers behind a queue of `capacity` tasks.
    ///
    /// # Panics
    /// Panics if `worker_count` or `capacity` is 0.
    pub fn new(
        collaborators: Collaborators,
        store: Option<FingerprintStore>,
        worker_count: usize,
        capacity: usize,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        assert!(capacity > 0, "capacity must be > 0");
        let (task_sender, task_receiver) = bounded::<DispatchTask>(capacity);
        let (result_sender, result_receiver) = bounded::<DispatchResult>(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let collaborators = Arc::new(collaborators);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_collaborators = Arc::clone(&collaborators);
            let worker_store = store.clone();

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    task_rx,
                    result_tx,
                    shutdown_flag,
                    worker_collaborators,
                    worker_store,
                );
            });
            workers.push(handle);
        }

        info!("Started {} dispatch workers (queue capacity {})", worker_count, capacity);

        Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
            capacity,
        }
    }

    /// Enqueues a task without blocking.
    pub fn submit(&self, task: DispatchTask) -> Result<Uuid, DispatchError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(DispatchError::ChannelClosed);
        }

        let id = task.id;
        match self.task_sender.try_send(task) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => Err(DispatchError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::ChannelClosed),
        }
    }

    pub fn try_recv_result(&self) -> Option<DispatchResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<DispatchResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn pending(&self) -> usize {
        self.task_sender.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops workers after their current task; queued tasks are abandoned.
    pub fn shutdown(&self) {
        info!("Shutting down dispatch queue...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Closes the queue and joins the workers. Without a prior `shutdown`
    /// the queued tasks are drained first.
    pub fn wait(self) {
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Dispatch worker {} panicked: {:?}", i, e);
            } else {
                debug!("Dispatch worker {} finished", i);
            }
        }

        info!("All dispatch workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<DispatchTask>,
    result_sender: Sender<DispatchResult>,
    shutdown: Arc<AtomicBool>,
    collaborators: Arc<Collaborators>,
    store: Option<FingerprintStore>,
) {
    debug!("Dispatch worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Dispatch worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => {
                let result = execute(&task, &collaborators, store.as_ref());
                // Results are informational; nobody draining them must not stall dispatch.
                if let Err(e) = result_sender.try_send(result) {
                    debug!("Dispatch worker {} dropped a result: {}", worker_id, e);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Dispatch worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Dispatch worker {} stopped", worker_id);
}

fn execute(
    task: &DispatchTask,
    collaborators: &Collaborators,
    store: Option<&FingerprintStore>,
) -> DispatchResult {
    let outcome: Result<String, CollaboratorError> = match (&task.payload, task.target) {
        (TaskPayload::CsDraft(request), _) => collaborators.cs_drafts.draft(request),
        (TaskPayload::Intake { message, entities }, DispatchTarget::RfqIntake) => {
            collaborators.rfq_intake.create(message, entities)
        }
        (TaskPayload::Intake { message, entities }, DispatchTarget::PriceCheckIntake) => {
            collaborators.price_check_intake.create(message, entities)
        }
        (TaskPayload::Intake { message, entities }, DispatchTarget::ShippingStore) => {
            collaborators.shipping_store.create(message, entities)
        }
        (TaskPayload::Intake { .. }, DispatchTarget::CsDraft) => Err(CollaboratorError::Rejected {
            collaborator: "cs drafts",
            reason: "intake payload sent to the CS draft target".to_string(),
        }),
    };

    let message = task.message();
    match outcome {
        Ok(record_id) => {
            if let (Some(store), Some(fp)) = (store, task.fingerprint.as_ref()) {
                if let Err(e) = store.attach_result(fp, &record_id) {
                    error!("Failed to attach result {} to fingerprint: {}", record_id, e);
                }
            }
            debug!(
                "Dispatched UID {} ({}) to {} as {}",
                message.id,
                message.mailbox,
                task.target.as_str(),
                record_id
            );
            DispatchResult {
                task_id: task.id,
                target: task.target,
                mailbox: message.mailbox.clone(),
                uid: message.id,
                success: true,
                record_id: Some(record_id),
                error: None,
            }
        }
        Err(e) => {
            error!(
                "Dispatch of UID {} ({}) to {} failed: {}",
                message.id,
                message.mailbox,
                task.target.as_str(),
                e
            );
            collaborators.notifier.notify(&OperatorAlert::new(
                AlertLevel::Error,
                AlertKind::DispatchFailed,
                message,
                format!("{} failed: {}", task.target.as_str(), e),
            ));
            DispatchResult {
                task_id: task.id,
                target: task.target,
                mailbox: message.mailbox.clone(),
                uid: message.id,
                success: false,
                record_id: None,
                error: Some(e.to_string()),
            }
        }
    }
}
