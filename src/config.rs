//! Engine configuration for approval constraints and code formats.

use crate::roles::Role;

/// Workflow group a sample belongs to. Selects the lab-code prefix and the
/// sequence the code is drawn from, so each group numbers independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum WorkflowGroup {
    #[n(0)]
    Chemistry,
    #[n(1)]
    Microbiology,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Roles that must independently approve a subject before it is ready.
    pub required_approval_roles: Vec<Role>,
    /// Signature slots a report carries.
    pub report_signature_roles: Vec<Role>,
    /// The role whose signature finalizes (locks) a report.
    pub closing_role: Role,
}

impl EngineConfig {
    /// Lab-code prefix per workflow group. Formatting itself is pure, see
    /// [`crate::sequence::format_code`].
    pub fn code_prefix(&self, group: WorkflowGroup) -> &'static str {
        match group {
            WorkflowGroup::Chemistry => "CHM",
            WorkflowGroup::Microbiology => "MIC",
        }
    }

    /// Name of the counter the group's lab codes are drawn from.
    pub fn sequence_name(&self, group: WorkflowGroup) -> &'static str {
        match group {
            WorkflowGroup::Chemistry => "lab_code_chemistry",
            WorkflowGroup::Microbiology => "lab_code_microbiology",
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_approval_roles: vec![Role::OperationalManager, Role::LaboratoryHead],
            report_signature_roles: vec![Role::OperationalManager, Role::LaboratoryHead],
            closing_role: Role::LaboratoryHead,
        }
    }
}
