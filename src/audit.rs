use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::engine::now_ms;
use crate::model::{Event, Ms, Table};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

/// One committed mutation with its before and after images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub at: Ms,
    pub action: AuditAction,
    pub table: Table,
    pub entity_id: Ulid,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

struct Ring {
    next_seq: u64,
    entries: VecDeque<AuditEntry>,
}

/// Passive recorder of committed changes: keeps the most recent entries in memory,
/// fans them out to subscribers and writes each one to the log.
pub struct AuditLog {
    capacity: usize,
    ring: Mutex<Ring>,
    tx: broadcast::Sender<AuditEntry>,
}

/// JSON image of an entity for the audit trail.
pub fn image<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn describe(event: &Event) -> (Table, Ulid, Option<Value>) {
    match event {
        Event::LocationSaved(v) => (Table::Locations, v.id, Some(image(v))),
        Event::LocationDeleted { id } => (Table::Locations, *id, None),
        Event::RackSaved(v) => (Table::Racks, v.id, Some(image(v))),
        Event::RackDeleted { id } => (Table::Racks, *id, None),
        Event::PcSaved(v) => (Table::Pcs, v.id, Some(image(v))),
        Event::PcDeleted { id } => (Table::Pcs, *id, None),
        Event::PatchPanelSaved(v) => (Table::PatchPanels, v.id, Some(image(v))),
        Event::PatchPanelDeleted { id } => (Table::PatchPanels, *id, None),
        Event::SwitchSaved(v) => (Table::Switches, v.id, Some(image(v))),
        Event::SwitchDeleted { id } => (Table::Switches, *id, None),
        Event::ConnectionSaved(v) => (Table::Connections, v.id, Some(image(v))),
        Event::ConnectionDeleted { id } => (Table::Connections, *id, None),
        Event::PdfTemplateAdded(v) => (Table::PdfTemplates, v.id, Some(image(v))),
        Event::PdfTemplateRemoved { id } => (Table::PdfTemplates, *id, None),
        Event::DefaultPdfSet { id } => (
            Table::Settings,
            Ulid::nil(),
            Some(serde_json::json!({ "default_pdf_id": id })),
        ),
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(Ring { next_seq: 1, entries: VecDeque::new() }),
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Record a committed event. `before` is the prior image, `None` for creations.
    pub fn record(&self, event: &Event, before: Option<Value>) {
        let (table, entity_id, after) = describe(event);
        let action = match (&before, &after) {
            (_, None) => AuditAction::Delete,
            (None, Some(_)) => AuditAction::Create,
            (Some(_), Some(_)) => AuditAction::Update,
        };

        let entry = {
            let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = AuditEntry {
                seq: ring.next_seq,
                at: now_ms(),
                action,
                table,
                entity_id,
                before,
                after,
            };
            ring.next_seq += 1;
            if ring.entries.len() == self.capacity {
                ring.entries.pop_front();
            }
            ring.entries.push_back(entry.clone());
            entry
        };

        tracing::info!(
            seq = entry.seq,
            action = action.as_str(),
            table = %table,
            id = %entity_id,
            "audit"
        );
        // No receivers is fine.
        let _ = self.tx.send(entry);
    }

    /// Live feed of entries as they are recorded, for embedders of the
    /// library. The wire server reads the retained ring through `recent`.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.tx.subscribe()
    }

    /// Retained entries, oldest first.
    pub fn recent(&self) -> Vec<AuditEntry> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.entries.iter().cloned().collect()
    }
}
