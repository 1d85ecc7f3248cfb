//! The sample aggregate.
//!
//! A sample is the unit of audit: it is created by a client submission and
//! then only ever moves forward through lifecycle, custody and verification.
//! Nothing here is hard-deleted; terminal statuses are tombstones.

use crate::config::WorkflowGroup;
use crate::custody::CustodyRecord;
use crate::error::{Error, Result};
use crate::lifecycle::RequestStatus;
use crate::roles::Role;
use crate::utils::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum CrosscheckStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Passed,
    #[n(2)]
    Failed,
}

/// Set at most once, by whichever verifier completes the dual approval.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct VerificationRecord {
    #[n(0)]
    pub verifier_id: String,
    #[n(1)]
    pub verifier_role: Role,
    #[n(2)]
    pub verified_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Sample {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub client_id: String,
    #[n(3)]
    pub workflow_group: WorkflowGroup,
    /// Human-readable code, assigned exactly once at intake validation.
    #[n(4)]
    pub lab_code: Option<String>,
    #[n(5)]
    pub status: RequestStatus,
    #[n(6)]
    pub custody: CustodyRecord,
    #[n(7)]
    pub crosscheck: CrosscheckStatus,
    #[n(8)]
    pub crosscheck_note: Option<String>,
    #[n(9)]
    pub verification: Option<VerificationRecord>,
    /// Mandatory note attached by the last return-style transition.
    #[n(10)]
    pub return_note: Option<String>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
}

impl Sample {
    pub fn new_draft(
        id: String,
        request_id: String,
        client_id: String,
        workflow_group: WorkflowGroup,
    ) -> Self {
        Self {
            id,
            request_id,
            client_id,
            workflow_group,
            lab_code: None,
            status: RequestStatus::Draft,
            custody: CustodyRecord::default(),
            crosscheck: CrosscheckStatus::Pending,
            crosscheck_note: None,
            verification: None,
            return_note: None,
            created_at: TimeStamp::new(),
        }
    }

    /// First assignment wins; an existing code is never reissued.
    pub fn assign_lab_code(&mut self, code: String) -> Result<()> {
        match &self.lab_code {
            Some(existing) => Err(Error::conflict(format!(
                "sample {} already carries lab code {existing}",
                self.id
            ))),
            None => {
                self.lab_code = Some(code);
                Ok(())
            }
        }
    }

    /// First verifier wins; the record is immutable once set.
    pub fn set_verification(&mut self, record: VerificationRecord) -> Result<()> {
        if self.verification.is_some() {
            return Err(Error::conflict(format!(
                "sample {} is already verified",
                self.id
            )));
        }
        self.verification = Some(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample::new_draft(
            "smpl_a".into(),
            "req_a".into(),
            "client_a".into(),
            WorkflowGroup::Chemistry,
        )
    }

    #[test]
    fn lab_code_is_assigned_once() {
        let mut s = sample();
        s.assign_lab_code("CHM-001".into()).unwrap();
        let err = s.assign_lab_code("CHM-002".into()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(s.lab_code.as_deref(), Some("CHM-001"));
    }

    #[test]
    fn verification_is_first_writer_wins() {
        let mut s = sample();
        let record = VerificationRecord {
            verifier_id: "om_1".into(),
            verifier_role: Role::OperationalManager,
            verified_at: TimeStamp::new(),
        };
        s.set_verification(record.clone()).unwrap();

        let second = VerificationRecord {
            verifier_id: "lh_1".into(),
            verifier_role: Role::LaboratoryHead,
            verified_at: TimeStamp::new(),
        };
        let err = s.set_verification(second).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(s.verification, Some(record));
    }

    #[test]
    fn sample_cbor_roundtrip() {
        let s = sample();
        let bytes = minicbor::to_vec(&s).unwrap();
        let back: Sample = minicbor::decode(&bytes).unwrap();
        assert_eq!(s, back);
    }
}
