//! Intake inspection checklist.
//!
//! Five fixed checks, submitted exactly once per inspection pass. A failed
//! check must carry a reason, validated item-by-item so the error can name
//! the offending check. The checklist is immutable after creation;
//! re-inspection is a new lifecycle pass, not an edit.

use crate::error::{Error, Result};
use crate::utils::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CheckItem {
    #[n(0)]
    pub passed: bool,
    #[n(1)]
    pub reason: Option<String>,
}

impl CheckItem {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct IntakeChecklist {
    #[n(0)]
    pub sample_id: String,
    #[n(1)]
    pub inspector_id: String,
    #[n(2)]
    pub container_intact: CheckItem,
    #[n(3)]
    pub label_matches_request: CheckItem,
    #[n(4)]
    pub volume_sufficient: CheckItem,
    #[n(5)]
    pub preservation_adequate: CheckItem,
    #[n(6)]
    pub documentation_complete: CheckItem,
    #[n(7)]
    pub submitted_at: TimeStamp<Utc>,
}

impl IntakeChecklist {
    fn items(&self) -> [(&'static str, &CheckItem); 5] {
        [
            ("container_intact", &self.container_intact),
            ("label_matches_request", &self.label_matches_request),
            ("volume_sufficient", &self.volume_sufficient),
            ("preservation_adequate", &self.preservation_adequate),
            ("documentation_complete", &self.documentation_complete),
        ]
    }

    /// Item-by-item validation: every failed check needs a non-empty reason.
    pub fn validate(&self) -> Result<()> {
        for (name, item) in self.items() {
            if !item.passed && item.reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
                return Err(Error::validation(format!(
                    "failed check '{name}' requires a reason"
                )));
            }
        }
        Ok(())
    }

    /// AND of all checks.
    pub fn is_passed(&self) -> bool {
        self.items().iter().all(|(_, item)| item.passed)
    }

    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.items()
            .iter()
            .filter(|(_, item)| !item.passed)
            .map(|(name, _)| *name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_pass(sample_id: &str) -> IntakeChecklist {
        IntakeChecklist {
            sample_id: sample_id.to_string(),
            inspector_id: "staff_1".to_string(),
            container_intact: CheckItem::pass(),
            label_matches_request: CheckItem::pass(),
            volume_sufficient: CheckItem::pass(),
            preservation_adequate: CheckItem::pass(),
            documentation_complete: CheckItem::pass(),
            submitted_at: TimeStamp::new(),
        }
    }

    #[test]
    fn all_pass_validates_and_is_passed() {
        let checklist = all_pass("smpl_a");
        checklist.validate().unwrap();
        assert!(checklist.is_passed());
        assert!(checklist.failed_checks().is_empty());
    }

    #[test]
    fn failed_check_without_reason_names_the_check() {
        let mut checklist = all_pass("smpl_a");
        checklist.volume_sufficient = CheckItem {
            passed: false,
            reason: None,
        };
        let err = checklist.validate().unwrap_err();
        assert!(err.to_string().contains("volume_sufficient"));

        checklist.volume_sufficient = CheckItem {
            passed: false,
            reason: Some("  ".to_string()),
        };
        assert!(checklist.validate().is_err());
    }

    #[test]
    fn failed_check_with_reason_validates_but_fails_overall() {
        let mut checklist = all_pass("smpl_a");
        checklist.container_intact = CheckItem::fail("cracked lid, sample exposed");
        checklist.validate().unwrap();
        assert!(!checklist.is_passed());
        assert_eq!(checklist.failed_checks(), vec!["container_intact"]);
    }
}
