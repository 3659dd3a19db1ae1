//! Pipeline stages and which of them run for each process type.

use crate::ProcessType;

/// A stage of the provisioning pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Validate,
    GenerateEnv,
    EnsureNetwork,
    DeployServices,
    WaitReady,
    RegisterAgent,
    Done,
}

/// Stage plan per process type. `Validate` always runs first and is not listed.
const STAGE_PLAN: &[(ProcessType, &[Stage])] = &[
    (
        ProcessType::InitialProvisioningOrbit,
        &[
            Stage::GenerateEnv,
            Stage::EnsureNetwork,
            Stage::DeployServices,
            Stage::WaitReady,
            Stage::RegisterAgent,
        ],
    ),
    (ProcessType::CreateAgentOrbit, &[Stage::RegisterAgent]),
];

impl Stage {
    /// Stages executed after validation for the given process type.
    pub fn plan(process_type: ProcessType) -> &'static [Stage] {
        STAGE_PLAN
            .iter()
            .find(|(ty, _)| *ty == process_type)
            .map(|(_, stages)| *stages)
            .unwrap_or(&[])
    }

    /// Whether this stage executes for the given process type.
    pub fn applies_to(self, process_type: ProcessType) -> bool {
        self == Stage::Validate || Self::plan(process_type).contains(&self)
    }

    /// Process exit code reported when a run ends at this stage.
    ///
    /// `Done` is the only stage that maps to success.
    pub fn exit_code(self) -> u8 {
        match self {
            Stage::Done => 0,
            Stage::Validate => 2,
            Stage::GenerateEnv => 3,
            Stage::EnsureNetwork => 4,
            Stage::DeployServices => 5,
            Stage::WaitReady => 6,
            Stage::RegisterAgent => 7,
        }
    }
}
