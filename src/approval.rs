//! Dual-party approval ledger.
//!
//! One entry per (subject, role). Clearing an approval nulls the timestamp
//! rather than deleting the row, so "who last touched it" survives. A subject
//! is ready when every required role carries a non-null timestamp.

use crate::roles::Role;
use crate::utils::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalEntry {
    #[n(0)]
    pub subject_id: String,
    #[n(1)]
    pub role: Role,
    #[n(2)]
    pub approver_id: Option<String>,
    #[n(3)]
    pub approved_at: Option<TimeStamp<Utc>>,
    /// Last actor to touch this row, approving or clearing.
    #[n(4)]
    pub updated_by: String,
}

impl ApprovalEntry {
    pub fn ledger_key(subject_id: &str, role: Role) -> String {
        format!("{subject_id}/{}", role.code())
    }

    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    pub fn approve(subject_id: &str, role: Role, approver_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role,
            approver_id: Some(approver_id.to_string()),
            approved_at: Some(TimeStamp::new()),
            updated_by: approver_id.to_string(),
        }
    }

    /// Null the timestamp, keep the row.
    pub fn clear(mut self, actor_id: &str) -> Self {
        self.approver_id = None;
        self.approved_at = None;
        self.updated_by = actor_id.to_string();
        self
    }
}

/// Readiness over a set of ledger entries: every required role must be
/// present and approved.
pub fn is_ready<'a>(
    entries: impl IntoIterator<Item = &'a ApprovalEntry>,
    required: &[Role],
) -> bool {
    let approved: Vec<Role> = entries
        .into_iter()
        .filter(|e| e.is_approved())
        .map(|e| e.role)
        .collect();
    required.iter().all(|role| approved.contains(role))
}
