//! Lab-code correction workflow.
//!
//! An issued lab code can only be replaced through a reviewed change request.
//! Pending requests move to a terminal Approved or Rejected; the reviewer
//! must not be the requester. Rows are never removed, they are the audit
//! history of identifier corrections.

use crate::error::{Error, Result};
use crate::utils::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum ChangeRequestState {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ChangeRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub sample_id: String,
    #[n(2)]
    pub current_code: String,
    #[n(3)]
    pub proposed_code: String,
    #[n(4)]
    pub state: ChangeRequestState,
    #[n(5)]
    pub requester_id: String,
    #[n(6)]
    pub reviewer_id: Option<String>,
    #[n(7)]
    pub review_note: Option<String>,
    #[n(8)]
    pub requested_at: TimeStamp<Utc>,
    #[n(9)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
}

impl ChangeRequest {
    pub fn new(
        id: String,
        sample_id: String,
        current_code: String,
        proposed_code: String,
        requester_id: String,
    ) -> Self {
        Self {
            id,
            sample_id,
            current_code,
            proposed_code,
            state: ChangeRequestState::Pending,
            requester_id,
            reviewer_id: None,
            review_note: None,
            requested_at: TimeStamp::new(),
            reviewed_at: None,
        }
    }

    /// Move to a terminal state. The original assigner cannot review their
    /// own request.
    pub fn review(&mut self, approve: bool, reviewer_id: &str, note: &str) -> Result<()> {
        if self.state != ChangeRequestState::Pending {
            return Err(Error::conflict(format!(
                "change request {} was already reviewed",
                self.id
            )));
        }
        if reviewer_id == self.requester_id {
            return Err(Error::validation(
                "change request reviewer must differ from the requester",
            ));
        }
        if note.trim().is_empty() {
            return Err(Error::validation("change request review requires a note"));
        }
        self.state = if approve {
            ChangeRequestState::Approved
        } else {
            ChangeRequestState::Rejected
        };
        self.reviewer_id = Some(reviewer_id.to_string());
        self.review_note = Some(note.to_string());
        self.reviewed_at = Some(TimeStamp::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> ChangeRequest {
        ChangeRequest::new(
            "chg_a".into(),
            "smpl_a".into(),
            "CHM-001".into(),
            "CHM-010".into(),
            "admin_1".into(),
        )
    }

    #[test]
    fn self_review_is_rejected() {
        let mut cr = pending();
        let err = cr.review(true, "admin_1", "typo in prefix").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(cr.state, ChangeRequestState::Pending);
    }

    #[test]
    fn review_is_terminal() {
        let mut cr = pending();
        cr.review(false, "admin_2", "code already in use").unwrap();
        assert_eq!(cr.state, ChangeRequestState::Rejected);

        let err = cr.review(true, "admin_2", "second thoughts").unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn review_requires_note() {
        let mut cr = pending();
        assert!(cr.review(true, "admin_2", "  ").is_err());
        assert_eq!(cr.state, ChangeRequestState::Pending);
    }
}
