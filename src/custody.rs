//! Physical custody chain for a sample.
//!
//! A fixed, totally ordered sequence of hand-off events. Each event sets
//! exactly one timestamp, requires its predecessor's timestamp and is
//! idempotent on repeat. The first event mirrors into the request lifecycle
//! (both machines describe the same real-world milestone).

use crate::error::{Error, Result};
use crate::roles::Role;
use crate::utils::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyStep {
    AdminReceivedFromClient,
    AdminBroughtToCollector,
    CollectorReceived,
    CollectorIntakeCompleted,
    CollectorReturnedToAdmin,
    AdminReceivedFromCollector,
    ClientPickedUp,
}

impl CustodyStep {
    pub const ALL: [CustodyStep; 7] = [
        CustodyStep::AdminReceivedFromClient,
        CustodyStep::AdminBroughtToCollector,
        CustodyStep::CollectorReceived,
        CustodyStep::CollectorIntakeCompleted,
        CustodyStep::CollectorReturnedToAdmin,
        CustodyStep::AdminReceivedFromCollector,
        CustodyStep::ClientPickedUp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CustodyStep::AdminReceivedFromClient => "admin_received_from_client",
            CustodyStep::AdminBroughtToCollector => "admin_brought_to_collector",
            CustodyStep::CollectorReceived => "collector_received",
            CustodyStep::CollectorIntakeCompleted => "collector_intake_completed",
            CustodyStep::CollectorReturnedToAdmin => "collector_returned_to_admin",
            CustodyStep::AdminReceivedFromCollector => "admin_received_from_collector",
            CustodyStep::ClientPickedUp => "client_picked_up",
        }
    }

    pub fn predecessor(&self) -> Option<CustodyStep> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        if idx == 0 { None } else { Some(Self::ALL[idx - 1]) }
    }

    /// Who records the hand-off. Client pickup is recorded by the
    /// administrator handing the sample over the counter.
    pub fn recording_role(&self) -> Role {
        match self {
            CustodyStep::AdminReceivedFromClient
            | CustodyStep::AdminBroughtToCollector
            | CustodyStep::AdminReceivedFromCollector
            | CustodyStep::ClientPickedUp => Role::Administrator,
            CustodyStep::CollectorReceived
            | CustodyStep::CollectorIntakeCompleted
            | CustodyStep::CollectorReturnedToAdmin => Role::Collector,
        }
    }
}

/// One nullable timestamp per custody step, each set at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CustodyRecord {
    #[n(0)]
    admin_received_from_client: Option<TimeStamp<Utc>>,
    #[n(1)]
    admin_brought_to_collector: Option<TimeStamp<Utc>>,
    #[n(2)]
    collector_received: Option<TimeStamp<Utc>>,
    #[n(3)]
    collector_intake_completed: Option<TimeStamp<Utc>>,
    #[n(4)]
    collector_returned_to_admin: Option<TimeStamp<Utc>>,
    #[n(5)]
    admin_received_from_collector: Option<TimeStamp<Utc>>,
    #[n(6)]
    client_picked_up: Option<TimeStamp<Utc>>,
}

/// Outcome of recording a custody event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyOutcome {
    Recorded,
    /// The timestamp was already set; the repeat is a no-op success.
    AlreadyRecorded,
}

impl CustodyRecord {
    pub fn timestamp(&self, step: CustodyStep) -> Option<&TimeStamp<Utc>> {
        match step {
            CustodyStep::AdminReceivedFromClient => self.admin_received_from_client.as_ref(),
            CustodyStep::AdminBroughtToCollector => self.admin_brought_to_collector.as_ref(),
            CustodyStep::CollectorReceived => self.collector_received.as_ref(),
            CustodyStep::CollectorIntakeCompleted => self.collector_intake_completed.as_ref(),
            CustodyStep::CollectorReturnedToAdmin => self.collector_returned_to_admin.as_ref(),
            CustodyStep::AdminReceivedFromCollector => self.admin_received_from_collector.as_ref(),
            CustodyStep::ClientPickedUp => self.client_picked_up.as_ref(),
        }
    }

    fn slot(&mut self, step: CustodyStep) -> &mut Option<TimeStamp<Utc>> {
        match step {
            CustodyStep::AdminReceivedFromClient => &mut self.admin_received_from_client,
            CustodyStep::AdminBroughtToCollector => &mut self.admin_brought_to_collector,
            CustodyStep::CollectorReceived => &mut self.collector_received,
            CustodyStep::CollectorIntakeCompleted => &mut self.collector_intake_completed,
            CustodyStep::CollectorReturnedToAdmin => &mut self.collector_returned_to_admin,
            CustodyStep::AdminReceivedFromCollector => &mut self.admin_received_from_collector,
            CustodyStep::ClientPickedUp => &mut self.client_picked_up,
        }
    }

    /// Record `step` at `at`. Precondition: the predecessor's timestamp is
    /// already set, else nothing is written and the error names the missing
    /// predecessor.
    pub fn record(&mut self, step: CustodyStep, at: TimeStamp<Utc>) -> Result<CustodyOutcome> {
        if self.timestamp(step).is_some() {
            return Ok(CustodyOutcome::AlreadyRecorded);
        }
        if let Some(prev) = step.predecessor() {
            if self.timestamp(prev).is_none() {
                return Err(Error::precondition(format!(
                    "custody event {} requires {} first",
                    step.name(),
                    prev.name()
                )));
            }
        }
        *self.slot(step) = Some(at);
        Ok(CustodyOutcome::Recorded)
    }
}
