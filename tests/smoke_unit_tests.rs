//! Smoke Screen Unit tests for the sample approval engine components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from integration scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!
#![allow(unused_imports)]

use chrono::{Datelike, Timelike, Utc};
use lab_approval::{
    approval::{ApprovalEntry, is_ready},
    document::{Document, DocumentKind, PlainRenderer, Renderer, Signature},
    lifecycle::{self, RequestStatus},
    roles::{Actor, Role},
    sequence::format_code,
    utils::{TimeStamp, new_uuid_to_bech32},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that new_uuid_to_bech32 generates valid bech32-encoded strings
    /// with the correct human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let result = new_uuid_to_bech32("smpl");
        assert!(result.is_ok());

        let encoded = result.unwrap();
        assert!(encoded.starts_with("smpl1"));
        assert!(encoded.len() > 10); // UUID should produce substantial output
    }

    /// Test that the function handles empty strings appropriately
    #[test]
    fn handles_empty_hrp() {
        // Empty string should fail
        let result = new_uuid_to_bech32("");
        assert!(result.is_err());
    }

    /// Test that multiple calls generate unique identifiers
    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("smpl").unwrap();
        let id2 = new_uuid_to_bech32("smpl").unwrap();
        let id3 = new_uuid_to_bech32("smpl").unwrap();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    /// Test that TimeStamp::new() creates a timestamp close to current time
    #[test]
    fn timestamp_new_creates_current_time() {
        let ts = TimeStamp::new();
        let now = Utc::now();

        let diff = (now - ts.to_datetime_utc()).num_seconds().abs();
        assert!(diff < 1); // Should be within 1 second
    }

    /// Test that TimeStamp CBOR encoding/decoding round-trips correctly
    #[test]
    fn timestamp_cbor_roundtrip() {
        let original = TimeStamp::new();

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: TimeStamp<Utc> = minicbor::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }
}

// LIFECYCLE MODULE TESTS
#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    /// Test the happy path through the staff-facing transition table
    #[test]
    fn happy_path_transitions_in_order() {
        let steps = [
            (RequestStatus::Draft, RequestStatus::Submitted, Role::Client),
            (
                RequestStatus::Submitted,
                RequestStatus::ReadyForDelivery,
                Role::Administrator,
            ),
            (
                RequestStatus::ReadyForDelivery,
                RequestStatus::PhysicallyReceived,
                Role::Administrator,
            ),
            (
                RequestStatus::PhysicallyReceived,
                RequestStatus::UnderInspection,
                Role::Collector,
            ),
            (
                RequestStatus::IntakeValidated,
                RequestStatus::AwaitingVerification,
                Role::Collector,
            ),
            (
                RequestStatus::AwaitingVerification,
                RequestStatus::ReturnedToAdmin,
                Role::Administrator,
            ),
        ];
        for (from, to, role) in steps {
            assert_eq!(lifecycle::apply(from, to, role, None).unwrap(), to);
        }
    }

    /// Test that the terminal state has no exits
    #[test]
    fn rejected_is_terminal() {
        assert!(RequestStatus::Rejected.is_terminal());
        for to in [
            RequestStatus::Submitted,
            RequestStatus::UnderInspection,
            RequestStatus::ReturnedToAdmin,
        ] {
            assert!(lifecycle::rule_for(RequestStatus::Rejected, to).is_none());
        }
    }
}

// SEQUENCE MODULE TESTS
#[cfg(test)]
mod sequence_tests {
    use super::*;

    /// Test code formatting across the padding boundary
    #[test]
    fn format_code_layout() {
        assert_eq!(format_code("CHM", 7), "CHM-007");
        assert_eq!(format_code("MIC", 123), "MIC-123");
        assert_eq!(format_code("CHM", 12345), "CHM-12345");
    }
}

// APPROVAL MODULE TESTS
#[cfg(test)]
mod approval_tests {
    use super::*;

    const REQUIRED: [Role; 2] = [Role::OperationalManager, Role::LaboratoryHead];

    /// Test that a subject needs every required role, not just any approval
    #[test]
    fn readiness_needs_every_required_role() {
        let lh = ApprovalEntry::approve("smpl_x", Role::LaboratoryHead, "lh_1");
        assert!(!is_ready([&lh], &REQUIRED));

        let om = ApprovalEntry::approve("smpl_x", Role::OperationalManager, "om_1");
        assert!(is_ready([&om, &lh], &REQUIRED));
    }

    /// Test that ledger keys separate roles on the same subject
    #[test]
    fn ledger_keys_are_role_scoped() {
        let om = ApprovalEntry::ledger_key("smpl_x", Role::OperationalManager);
        let lh = ApprovalEntry::ledger_key("smpl_x", Role::LaboratoryHead);
        assert_ne!(om, lh);
        assert!(om.starts_with("smpl_x/"));
    }
}

// DOCUMENT MODULE TESTS
#[cfg(test)]
mod document_tests {
    use super::*;

    /// Test the two-phase hash relationship: the final bytes embed a marker
    /// derived from the draft-bytes hash, and hash to a different value
    #[test]
    fn draft_and_final_hashes_differ() {
        let doc = Document::new(
            "doc_x".into(),
            DocumentKind::LetterOfOrder,
            vec!["smpl_x".into()],
            "letter_of_order_v1".into(),
        );
        let payload = doc.canonical_payload().unwrap();

        let renderer = PlainRenderer;
        let draft = renderer.render(&doc.template, &payload, None).unwrap();
        let verify_code = sha256::digest(&draft);

        let marker = format!("verify/{verify_code}");
        let final_bytes = renderer
            .render(&doc.template, &payload, Some(&marker))
            .unwrap();
        let document_hash = sha256::digest(&final_bytes);

        assert_ne!(verify_code, document_hash);
        assert!(String::from_utf8_lossy(&final_bytes).contains(&marker));
    }

    /// Test that signature slot keys are per (document, role)
    #[test]
    fn signature_slot_keys() {
        assert_eq!(
            Signature::slot_key("doc_x", Role::OperationalManager),
            "doc_x/OM"
        );
        assert_ne!(
            Signature::slot_key("doc_x", Role::OperationalManager),
            Signature::slot_key("doc_x", Role::LaboratoryHead),
        );
    }
}
