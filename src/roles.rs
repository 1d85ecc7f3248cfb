//! Central role table.
//!
//! Every role-gated decision in the engine goes through this module so the
//! role-to-code mapping lives in exactly one place. The identity provider is
//! external; an [`Actor`] is an opaque authenticated input.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum Role {
    #[n(0)]
    Client,
    #[n(1)]
    Administrator,
    #[n(2)]
    Collector,
    #[n(3)]
    OperationalManager,
    #[n(4)]
    LaboratoryHead,
}

impl Role {
    /// Short role code used for ledger and signature slot keys.
    pub fn code(&self) -> &'static str {
        match self {
            Role::Client => "CL",
            Role::Administrator => "AD",
            Role::Collector => "CO",
            Role::OperationalManager => "OM",
            Role::LaboratoryHead => "LH",
        }
    }

    pub fn from_code(code: &str) -> Result<Role> {
        match code {
            "CL" => Ok(Role::Client),
            "AD" => Ok(Role::Administrator),
            "CO" => Ok(Role::Collector),
            "OM" => Ok(Role::OperationalManager),
            "LH" => Ok(Role::LaboratoryHead),
            other => Err(Error::validation(format!("unknown role code: {other}"))),
        }
    }

    /// Roles allowed to verify a sample and to hold approval-ledger slots.
    pub fn is_verifier(&self) -> bool {
        matches!(self, Role::OperationalManager | Role::LaboratoryHead)
    }
}

/// An authenticated actor as supplied by the external identity provider.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// A signer may only sign their own mapped slot; same rule for approval
    /// flags. Enforced here rather than at each call site.
    pub fn require_role(&self, role: Role, action: &str) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(Error::unauthorized(self.role, action.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_code_roundtrip() {
        for role in [
            Role::Client,
            Role::Administrator,
            Role::Collector,
            Role::OperationalManager,
            Role::LaboratoryHead,
        ] {
            assert_eq!(Role::from_code(role.code()).unwrap(), role);
        }
    }

    #[test]
    fn only_om_and_lh_are_verifiers() {
        assert!(Role::OperationalManager.is_verifier());
        assert!(Role::LaboratoryHead.is_verifier());
        assert!(!Role::Administrator.is_verifier());
        assert!(!Role::Client.is_verifier());
        assert!(!Role::Collector.is_verifier());
    }
}
