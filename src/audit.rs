//! Best-effort audit side-channel.
//!
//! Every state transition emits an event after its transaction commits. The
//! sink contract is explicit about failure isolation: a sink outage must
//! never abort the business operation, so failures are logged and swallowed
//! at the emit site.

use crate::error::Result;
use crate::utils::{TimeStamp, to_cbor};
use chrono::Utc;
use sled::Tree;

/// Field snapshots travel as (field, rendered value) pairs so the sink never
/// needs to understand entity schemas.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct AuditEvent {
    #[n(0)]
    pub action: String,
    #[n(1)]
    pub actor_id: String,
    #[n(2)]
    pub entity_name: String,
    #[n(3)]
    pub entity_id: String,
    #[n(4)]
    pub old_values: Vec<(String, String)>,
    #[n(5)]
    pub new_values: Vec<(String, String)>,
    #[n(6)]
    pub at: TimeStamp<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: impl Into<String>,
        actor_id: impl Into<String>,
        entity_name: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor_id: actor_id.into(),
            entity_name: entity_name.into(),
            entity_id: entity_id.into(),
            old_values: vec![],
            new_values: vec![],
            at: TimeStamp::new(),
        }
    }

    pub fn old(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.old_values.push((field.into(), value.into()));
        self
    }

    pub fn new_value(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.new_values.push((field.into(), value.into()));
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Append-only sink over a sled tree, keyed by a monotonically increasing
/// db-generated id so iteration returns events in emit order.
pub struct TreeAuditSink {
    db: sled::Db,
    tree: Tree,
}

impl TreeAuditSink {
    pub fn new(db: sled::Db, tree: Tree) -> Self {
        Self { db, tree }
    }

    pub fn events(&self) -> Result<Vec<AuditEvent>> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            out.push(crate::utils::from_cbor(&value)?);
        }
        Ok(out)
    }
}

impl AuditSink for TreeAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        let key = self.db.generate_id()?.to_be_bytes();
        self.tree.insert(key, to_cbor(event)?)?;
        Ok(())
    }
}

/// Emit an event, swallowing sink failures. The primary state transition is
/// the operation of record; the audit entry is best-effort.
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(&event) {
        tracing::warn!(
            action = %event.action,
            entity = %event.entity_name,
            entity_id = %event.entity_id,
            "audit write failed: {e}"
        );
    }
}
