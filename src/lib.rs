//! Laboratory sample lifecycle and multi-party approval engine.
//!
//! Samples move from client draft through physical custody, intake
//! inspection, verification and document issuance. Every multi-step
//! transition commits atomically through sled transactions; approvals,
//! signatures and issued documents form append-style ledgers that are
//! corrected through sanctioned workflows rather than mutated in place.

pub mod approval;
pub mod artifact;
pub mod audit;
pub mod change_request;
pub mod checklist;
pub mod config;
pub mod custody;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod roles;
pub mod sample;
pub mod sequence;
pub mod service;
pub mod utils;

pub use config::{EngineConfig, WorkflowGroup};
pub use error::{Error, Result};
pub use lifecycle::RequestStatus;
pub use roles::{Actor, Role};
pub use service::{BulkOutcome, LabService};
