//! Error taxonomy for the approval engine.
//!
//! Four caller-visible classes: precondition violations (caller mistake,
//! nothing mutated), conflicts (a race was lost, often success-equivalent
//! for the caller), integrity failures (fatal, fail closed) and
//! authorization failures (blocked and audited).

use crate::roles::Role;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An ordered step was attempted before its predecessor was satisfied.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// The operation was already applied by someone else (already signed,
    /// already verified, already locked, already submitted).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored hash disagrees with stored bytes. Never served past this.
    #[error("integrity failure for {entity} {id}: stored hash does not match stored bytes")]
    Integrity { entity: &'static str, id: String },

    /// A role-scoped action attempted by the wrong role.
    #[error("role {role:?} is not permitted to {action}")]
    Unauthorized { role: Role, action: String },

    /// Malformed or incomplete input, naming the offending field or check.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Crosscheck gate on a computed-artifact cycle, listing the blockers.
    #[error("crosscheck not passed for samples: {0:?}")]
    CrosscheckBlocked(Vec<String>),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
    pub fn unauthorized(role: Role, action: impl Into<String>) -> Self {
        Error::Unauthorized {
            role,
            action: action.into(),
        }
    }

    /// Conflicts mean "someone already did this"; callers retrying a
    /// transition may treat them as success-equivalent.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

// Aborted sled transactions carry our error back out; storage faults wrap.
impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(e: sled::transaction::TransactionError<Error>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => Error::Storage(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
