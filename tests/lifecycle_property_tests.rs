//! Property-based tests for the lifecycle and custody state machines
//!
//! This module uses proptest to verify the transition table and the custody
//! chain across a wide variety of generated inputs. The state machines are
//! critical - bugs here corrupt the entire sample workflow.
//!
//! These tests focus on invariants that should hold regardless of the
//! specific input sequence, helping catch edge cases that would be difficult
//! to find with manual test case selection.

use proptest::prelude::*;

use lab_approval::custody::{CustodyOutcome, CustodyRecord, CustodyStep};
use lab_approval::lifecycle::{self, RequestStatus};
use lab_approval::roles::Role;
use lab_approval::utils::TimeStamp;

const ALL_STATUSES: [RequestStatus; 13] = [
    RequestStatus::Draft,
    RequestStatus::Submitted,
    RequestStatus::Returned,
    RequestStatus::NeedsRevision,
    RequestStatus::ReadyForDelivery,
    RequestStatus::PhysicallyReceived,
    RequestStatus::UnderInspection,
    RequestStatus::IntakeChecklistPassed,
    RequestStatus::IntakeValidated,
    RequestStatus::AwaitingVerification,
    RequestStatus::Rejected,
    RequestStatus::ReturnedToAdmin,
    RequestStatus::InspectionFailed,
];

const ALL_ROLES: [Role; 5] = [
    Role::Client,
    Role::Administrator,
    Role::Collector,
    Role::OperationalManager,
    Role::LaboratoryHead,
];

fn status_strategy() -> impl Strategy<Value = RequestStatus> {
    prop::sample::select(ALL_STATUSES.to_vec())
}

fn role_strategy() -> impl Strategy<Value = Role> {
    prop::sample::select(ALL_ROLES.to_vec())
}

fn step_strategy() -> impl Strategy<Value = CustodyStep> {
    prop::sample::select(CustodyStep::ALL.to_vec())
}

proptest! {
    /// Property: re-requesting the current state always succeeds and never
    /// moves the machine, for any role and any note.
    #[test]
    fn prop_repeat_transition_is_idempotent(
        status in status_strategy(),
        role in role_strategy(),
        note in prop::option::of(".{0,20}"),
    ) {
        let out = lifecycle::apply(status, status, role, note.as_deref()).unwrap();
        prop_assert_eq!(out, status);
    }

    /// Property: a successful transition always lands on the requested
    /// target, and a failed one reports through the error taxonomy without
    /// inventing a third outcome.
    #[test]
    fn prop_apply_lands_on_target_or_errors(
        from in status_strategy(),
        to in status_strategy(),
        role in role_strategy(),
    ) {
        match lifecycle::apply(from, to, role, Some("note for return paths")) {
            Ok(out) => prop_assert!(out == to || (out == from && from == to)),
            Err(e) => {
                let msg = e.to_string();
                prop_assert!(!msg.is_empty());
            }
        }
    }

    /// Property: the checklist-derived statuses are never reachable through
    /// the generic table, from anywhere, for any role. They are only
    /// produced by checklist submission.
    #[test]
    fn prop_checklist_states_unreachable(
        from in status_strategy(),
        role in role_strategy(),
    ) {
        for target in [
            RequestStatus::IntakeChecklistPassed,
            RequestStatus::IntakeValidated,
            RequestStatus::Rejected,
        ] {
            if from == target {
                continue; // idempotent repeat, not a transition
            }
            prop_assert!(
                lifecycle::apply(from, target, role, Some("n")).is_err(),
                "{:?} -> {:?} must not be reachable", from, target
            );
        }
    }

    /// Property: the terminal state has no outgoing transition at all.
    #[test]
    fn prop_terminal_state_is_stable(
        to in status_strategy(),
        role in role_strategy(),
    ) {
        if to != RequestStatus::Rejected {
            prop_assert!(
                lifecycle::apply(RequestStatus::Rejected, to, role, Some("n")).is_err()
            );
        }
    }

    /// Property: for every rule in the table, exactly one role passes the
    /// gate and the other four are rejected as Unauthorized.
    #[test]
    fn prop_exactly_one_role_per_transition(
        from in status_strategy(),
        to in status_strategy(),
    ) {
        if from == to {
            return Ok(());
        }
        if let Some(rule) = lifecycle::rule_for(from, to) {
            for role in ALL_ROLES {
                let result = lifecycle::apply(from, to, role, Some("reason"));
                if role == rule.role {
                    prop_assert!(result.is_ok());
                } else {
                    prop_assert!(result.is_err());
                }
            }
        }
    }

    /// Property: recording an arbitrary step sequence never produces a chain
    /// with a hole - a set timestamp implies its predecessor is set.
    #[test]
    fn prop_custody_chain_has_no_holes(
        steps in prop::collection::vec(step_strategy(), 0..=20),
    ) {
        let mut record = CustodyRecord::default();
        for step in steps {
            // failures are expected for out-of-order attempts; the invariant
            // is about what gets written, not about which calls succeed
            let _ = record.record(step, TimeStamp::new());
        }
        for step in CustodyStep::ALL {
            if record.timestamp(step).is_some() {
                if let Some(prev) = step.predecessor() {
                    prop_assert!(
                        record.timestamp(prev).is_some(),
                        "{} is set but {} is not", step.name(), prev.name()
                    );
                }
            }
        }
    }

    /// Property: a repeated custody step reports AlreadyRecorded and keeps
    /// the first timestamp.
    #[test]
    fn prop_custody_repeat_keeps_first_timestamp(
        prefix_len in 1usize..=7,
        repeat_idx in 0usize..7,
    ) {
        prop_assume!(repeat_idx < prefix_len);
        let mut record = CustodyRecord::default();
        for step in &CustodyStep::ALL[..prefix_len] {
            record.record(*step, TimeStamp::new()).unwrap();
        }
        let step = CustodyStep::ALL[repeat_idx];
        let before = record.timestamp(step).cloned();

        let outcome = record.record(step, TimeStamp::new()).unwrap();
        prop_assert_eq!(outcome, CustodyOutcome::AlreadyRecorded);
        prop_assert_eq!(record.timestamp(step).cloned(), before);
    }
}
