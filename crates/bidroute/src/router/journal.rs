//! JSON-lines journal used as the default downstream intake.
//!
//! Each queue appends to its own `<queue>.jsonl` file in the journal
//! directory. The QA audit reads the same files back.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::message::InboundMessage;
use crate::triage::{ActiveItem, CsIntent, EntitySet};

use super::collaborators::{CsDraftCollaborator, CsDraftRequest, IntakeCollaborator};

const COLLABORATOR: &str = "journal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalQueue {
    Rfq,
    PriceCheck,
    Shipping,
    CsDrafts,
}

impl JournalQueue {
    pub const ALL: [JournalQueue; 4] = [
        JournalQueue::Rfq,
        JournalQueue::PriceCheck,
        JournalQueue::Shipping,
        JournalQueue::CsDrafts,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            JournalQueue::Rfq => "rfq.jsonl",
            JournalQueue::PriceCheck => "price_check.jsonl",
            JournalQueue::Shipping => "shipping.jsonl",
            JournalQueue::CsDrafts => "cs_drafts.jsonl",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            JournalQueue::Rfq => "RFQ",
            JournalQueue::PriceCheck => "PC",
            JournalQueue::Shipping => "SHIP",
            JournalQueue::CsDrafts => "CS",
        }
    }
}

/// One line of a journal file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub queue: JournalQueue,
    pub created_at: DateTime<Utc>,
    pub mailbox: String,
    pub uid: u32,
    pub subject: String,
    pub sender_email: String,
    pub entities: EntitySet,
    #[serde(default)]
    pub attachment_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cs_intent: Option<CsIntent>,
    #[serde(default)]
    pub followup: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_items: Vec<ActiveItem>,
}

/// Appends intake records for one queue.
pub struct JournalIntake {
    queue: JournalQueue,
    path: PathBuf,
    lock: Mutex<()>,
}

impl JournalIntake {
    pub fn new(dir: &Path, queue: JournalQueue) -> Result<Self, CollaboratorError> {
        std::fs::create_dir_all(dir).map_err(|e| CollaboratorError::Io {
            collaborator: COLLABORATOR,
            source: e,
        })?;
        Ok(Self {
            queue,
            path: dir.join(queue.file_name()),
            lock: Mutex::new(()),
        })
    }

    pub fn queue(&self) -> JournalQueue {
        self.queue
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn new_id(&self) -> String {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.queue.id_prefix(), &uuid[..12])
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), CollaboratorError> {
        let mut line = serde_json::to_string(entry).map_err(|e| CollaboratorError::Serialization {
            collaborator: COLLABORATOR,
            source: e,
        })?;
        line.push('\n');

        let _guard = self.lock.lock().map_err(|_| CollaboratorError::Unavailable {
            collaborator: COLLABORATOR,
            reason: "journal lock poisoned".to_string(),
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CollaboratorError::Io {
                collaborator: COLLABORATOR,
                source: e,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|e| CollaboratorError::Io {
                collaborator: COLLABORATOR,
                source: e,
            })
    }

    fn entry(&self, message: &InboundMessage, entities: &EntitySet) -> JournalEntry {
        JournalEntry {
            id: self.new_id(),
            queue: self.queue,
            created_at: Utc::now(),
            mailbox: message.mailbox.clone(),
            uid: message.id,
            subject: message.subject.clone(),
            sender_email: message.sender_email.clone(),
            entities: entities.clone(),
            attachment_names: message.attachment_names.clone(),
            cs_intent: None,
            followup: false,
            linked_items: Vec::new(),
        }
    }
}

impl IntakeCollaborator for JournalIntake {
    fn create(
        &self,
        message: &InboundMessage,
        entities: &EntitySet,
    ) -> Result<String, CollaboratorError> {
        let entry = self.entry(message, entities);
        self.append(&entry)?;
        Ok(entry.id)
    }
}

impl CsDraftCollaborator for JournalIntake {
    fn draft(&self, request: &CsDraftRequest) -> Result<String, CollaboratorError> {
        let mut entry = self.entry(&request.message, &request.entities);
        entry.cs_intent = request.intent;
        entry.followup = request.followup;
        entry.linked_items = request.linked_items.clone();
        self.append(&entry)?;
        Ok(entry.id)
    }
}

/// Reads every entry of one queue. A missing file is an empty queue;
/// unparseable lines are skipped.
pub fn read_entries(dir: &Path, queue: JournalQueue) -> Result<Vec<JournalEntry>, CollaboratorError> {
    let path = dir.join(queue.file_name());
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(CollaboratorError::Io {
                collaborator: COLLABORATOR,
                source: e,
            })
        }
    };

    let mut entries = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| CollaboratorError::Io {
            collaborator: COLLABORATOR,
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => log::warn!("Skipping line {} of {}: {}", n + 1, path.display(), e),
        }
    }
    Ok(entries)
}
