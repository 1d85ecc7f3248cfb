//! Request lifecycle state machine.
//!
//! The client-facing status of a sample, distinct from physical custody.
//! Every transition is role-gated through a single table; return-style
//! transitions additionally demand a non-empty note because that note is the
//! only audit trail for why work stalled.

use crate::error::{Error, Result};
use crate::roles::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum RequestStatus {
    /// The client's private editing state. Invisible to staff queues; no
    /// staff transition originates here.
    #[n(0)]
    Draft,
    #[n(1)]
    Submitted,
    #[n(2)]
    Returned,
    #[n(3)]
    NeedsRevision,
    #[n(4)]
    ReadyForDelivery,
    #[n(5)]
    PhysicallyReceived,
    #[n(6)]
    UnderInspection,
    #[n(7)]
    IntakeChecklistPassed,
    #[n(8)]
    IntakeValidated,
    #[n(9)]
    AwaitingVerification,
    #[n(10)]
    Rejected,
    #[n(11)]
    ReturnedToAdmin,
    #[n(12)]
    InspectionFailed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 13] = [
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

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Rejected)
    }
}

/// Whether `role` may lawfully land a sample on `target` from anywhere in
/// the table. An idempotent repeat has no `from` row to consult, so it is
/// gated on this instead: only an actor who could have made the transition
/// gets the no-op success.
pub fn may_request(target: RequestStatus, role: Role) -> bool {
    RequestStatus::ALL
        .iter()
        .any(|from| rule_for(*from, target).is_some_and(|rule| rule.role == role))
}

/// What a transition demands of its caller.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub role: Role,
    pub requires_note: bool,
}

/// The central transition table. Checklist-derived statuses
/// (IntakeChecklistPassed / IntakeValidated / Rejected) are deliberately
/// absent: they are only reachable through checklist submission.
pub fn rule_for(from: RequestStatus, to: RequestStatus) -> Option<TransitionRule> {
    use RequestStatus::*;
    let rule = |role, requires_note| Some(TransitionRule { role, requires_note });
    match (from, to) {
        (Draft, Submitted) => rule(Role::Client, false),
        (Submitted, ReadyForDelivery) => rule(Role::Administrator, false),
        (Submitted, Returned) => rule(Role::Administrator, true),
        (Returned, NeedsRevision) => rule(Role::Client, false),
        (NeedsRevision, Submitted) => rule(Role::Client, false),
        (ReadyForDelivery, PhysicallyReceived) => rule(Role::Administrator, false),
        (PhysicallyReceived, UnderInspection) => rule(Role::Collector, false),
        (UnderInspection, InspectionFailed) => rule(Role::Collector, true),
        (IntakeValidated, AwaitingVerification) => rule(Role::Collector, false),
        (AwaitingVerification, ReturnedToAdmin) => rule(Role::Administrator, false),
        (InspectionFailed, ReturnedToAdmin) => rule(Role::Administrator, false),
        _ => None,
    }
}

/// Validate a requested transition against the table.
///
/// Re-requesting the current state succeeds idempotently so retried requests
/// are harmless. Returns the resulting status.
pub fn apply(
    current: RequestStatus,
    target: RequestStatus,
    role: Role,
    note: Option<&str>,
) -> Result<RequestStatus> {
    if current == target {
        return Ok(current);
    }
    let rule = rule_for(current, target).ok_or_else(|| {
        Error::precondition(format!(
            "no transition from {current:?} to {target:?}"
        ))
    })?;
    if rule.role != role {
        return Err(Error::unauthorized(
            role,
            format!("transition {current:?} -> {target:?}"),
        ));
    }
    if rule.requires_note && note.map_or(true, |n| n.trim().is_empty()) {
        return Err(Error::validation(format!(
            "transition {current:?} -> {target:?} requires a non-empty note"
        )));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_of_current_state_is_idempotent() {
        let out = apply(
            RequestStatus::Submitted,
            RequestStatus::Submitted,
            Role::Client,
            None,
        )
        .unwrap();
        assert_eq!(out, RequestStatus::Submitted);
    }

    #[test]
    fn return_requires_note() {
        let err = apply(
            RequestStatus::Submitted,
            RequestStatus::Returned,
            Role::Administrator,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = apply(
            RequestStatus::Submitted,
            RequestStatus::Returned,
            Role::Administrator,
            Some("   "),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        apply(
            RequestStatus::Submitted,
            RequestStatus::Returned,
            Role::Administrator,
            Some("missing chain-of-custody form"),
        )
        .unwrap();
    }

    #[test]
    fn draft_has_no_staff_exit() {
        for role in [Role::Administrator, Role::Collector] {
            let err = apply(RequestStatus::Draft, RequestStatus::Submitted, role, None)
                .unwrap_err();
            assert!(matches!(err, Error::Unauthorized { .. }));
        }
    }

    #[test]
    fn checklist_states_unreachable_through_table() {
        assert!(rule_for(RequestStatus::UnderInspection, RequestStatus::IntakeValidated).is_none());
        assert!(rule_for(RequestStatus::UnderInspection, RequestStatus::Rejected).is_none());
        assert!(
            rule_for(
                RequestStatus::UnderInspection,
                RequestStatus::IntakeChecklistPassed
            )
            .is_none()
        );
    }

    #[test]
    fn repeats_are_gated_on_a_role_that_can_reach_the_state() {
        assert!(may_request(RequestStatus::ReadyForDelivery, Role::Administrator));
        assert!(!may_request(RequestStatus::ReadyForDelivery, Role::Collector));
        assert!(may_request(RequestStatus::Submitted, Role::Client));
        assert!(!may_request(RequestStatus::Submitted, Role::Administrator));
        // nothing transitions into Draft, so nobody may re-request it
        for role in [Role::Client, Role::Administrator, Role::Collector] {
            assert!(!may_request(RequestStatus::Draft, role));
        }
    }

    #[test]
    fn wrong_role_is_rejected() {
        let err = apply(
            RequestStatus::Submitted,
            RequestStatus::ReadyForDelivery,
            Role::Collector,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }
}
