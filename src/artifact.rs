//! Proposal/approval versioning for computed artifacts.
//!
//! Reagent-style calculations go through propose -> approve/reject. Every
//! decision bumps the version, approval moves the proposal into the effective
//! payload and locks the artifact. Rejection discards the proposal and leaves
//! the artifact open for another cycle; there is no cap on cycles.

use crate::error::{Error, Result};
use crate::utils::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ComputedArtifact {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_id: String,
    /// What kind of calculation this is, e.g. "reagent".
    #[n(2)]
    pub kind: String,
    #[n(3)]
    pub effective: Option<Vec<u8>>,
    #[n(4)]
    pub proposal: Option<Vec<u8>>,
    #[n(5)]
    pub version_no: u64,
    #[n(6)]
    pub locked: bool,
    #[n(7)]
    pub approver_id: Option<String>,
    #[n(8)]
    pub decided_at: Option<TimeStamp<Utc>>,
}

impl ComputedArtifact {
    pub fn new(id: String, request_id: String, kind: String) -> Self {
        Self {
            id,
            request_id,
            kind,
            effective: None,
            proposal: None,
            version_no: 0,
            locked: false,
            approver_id: None,
            decided_at: None,
        }
    }

    pub fn storage_key(request_id: &str, kind: &str) -> String {
        format!("{request_id}/{kind}")
    }

    /// Store a pending edit. Only while unlocked; never touches `effective`.
    pub fn propose(&mut self, data: Vec<u8>) -> Result<()> {
        if self.locked {
            return Err(Error::conflict(format!(
                "artifact {} is locked, direct mutation is not permitted",
                self.id
            )));
        }
        self.proposal = Some(data);
        self.version_no += 1;
        Ok(())
    }

    /// Decide the pending proposal. Approve or reject, the decision is a
    /// versioned event either way.
    pub fn decide(&mut self, approve: bool, approver_id: &str) -> Result<()> {
        let Some(proposal) = self.proposal.take() else {
            return Err(Error::precondition(format!(
                "artifact {} has no pending proposal to decide",
                self.id
            )));
        };
        if approve {
            self.effective = Some(proposal);
            self.approver_id = Some(approver_id.to_string());
            self.decided_at = Some(TimeStamp::new());
            self.locked = true;
        }
        self.version_no += 1;
        Ok(())
    }
}
