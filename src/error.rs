//! Error taxonomy for the orchestration engine.
//!
//! Every variant is fatal to the run that raised it. Assertion
//! failures are not errors: they are reported through
//! [`crate::assertion::AssertionOutcome`].

use crate::model::AssertType;
use std::fmt;
use thiserror::Error;

/// Why a piece of configuration was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFault {
    BaseUrlInvalid,
    UnknownExecution,
    UnknownDefinition,
    UnknownSuite,
    DuplicateName,
    UnknownDependency,
    DependencyCycle,
}

impl ConfigFault {
    /// Stable reason code, suitable for log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BaseUrlInvalid => "BASEURL_INVALID",
            Self::UnknownExecution => "INVALID_EXEC_NAME",
            Self::UnknownDefinition => "INVALID_DEF_NAME",
            Self::UnknownSuite => "INVALID_SUITE_NAME",
            Self::DuplicateName => "DUPLICATE_NAME",
            Self::UnknownDependency => "UNKNOWN_DEPENDENCY",
            Self::DependencyCycle => "DEPENDENCY_CYCLE",
        }
    }
}

impl fmt::Display for ConfigFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Which validation step rejected a variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFault {
    Malformed,
    ExecutionUnreachable,
    SelfReference,
    DefinitionNotFound,
    MissingNamespace,
}

impl fmt::Display for ReferenceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Malformed => "malformed reference",
            Self::ExecutionUnreachable => "execution name not reachable",
            Self::SelfReference => "self reference not permitted",
            Self::DefinitionNotFound => "definition name not found",
            Self::MissingNamespace => "missing request/response namespace",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum RestelError {
    #[error("invalid configuration [{fault}]: '{name}'")]
    InvalidConfig { fault: ConfigFault, name: String },

    #[error("name '{key}' is already bound in the context of '{run}'")]
    NameCollision { key: String, run: String },

    #[error(
        "invalid reference '{pattern}' in '{run}': {fault} (segment '{segment}')"
    )]
    InvalidReference {
        pattern: String,
        segment: String,
        run: String,
        fault: ReferenceFault,
    },

    #[error("invalid function operation '{operation}'")]
    InvalidOperation { operation: String },

    #[error("function operation '{operation}' used in '{run}' is not implemented")]
    NotImplemented { operation: String, run: String },

    #[error("invalid assert type '{0}'")]
    InvalidAssertType(String),

    #[error("variable '{name}' is not bound in the context of '{run}'")]
    UnboundVariable { name: String, run: String },

    #[error("no matcher registered for assert type {0}")]
    MissingMatcher(AssertType),

    #[error("no matcher strategy named '{0}'")]
    UnknownMatcher(String),

    #[error(transparent)]
    Delegation(#[from] anyhow::Error),
}

impl RestelError {
    pub fn config(fault: ConfigFault, name: impl Into<String>) -> Self {
        Self::InvalidConfig {
            fault,
            name: name.into(),
        }
    }
}

impl RestelError {
    /// Wrap a definition runner failure, recovering an engine error
    /// raised inside the runner as its own variant.
    pub fn from_delegation(err: anyhow::Error) -> Self {
        match err.downcast::<RestelError>() {
            Ok(typed) => typed,
            Err(other) => Self::Delegation(other),
        }
    }
}

pub type Result<T, E = RestelError> = std::result::Result<T, E>;
