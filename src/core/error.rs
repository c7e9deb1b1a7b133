//! Error taxonomy for the deployment engine.

use thiserror::Error;

use crate::domain::{ArtifactType, Phase};

/// Terminal or intermediate state of a long-running remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unknown(String),
}

impl OperationState {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "notstarted" => Self::NotStarted,
            "running" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Only these end the polling loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => f.write_str("NotStarted"),
            Self::Running => f.write_str("Running"),
            Self::Succeeded => f.write_str("Succeeded"),
            Self::Failed => f.write_str("Failed"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

/// Everything that can go wrong while deploying
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("No matching deployment profile found for environment '{environment}' ({environment_type}, layer '{layer}')")]
    NoMatchingProfile {
        environment: String,
        environment_type: String,
        layer: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("There is a cycle in the dependency graph; cannot order: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("Malformed {shape} activity: missing '{field}'")]
    MalformedReference { shape: String, field: String },

    #[error("Item with logical ID {logical_id} ({artifact_type} '{name}') is not yet deployed")]
    NotYetDeployed {
        logical_id: String,
        artifact_type: ArtifactType,
        name: String,
    },

    #[error("Remote call '{operation}' failed with status {status}: {body}")]
    Remote {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Transport error during '{operation}': {message}")]
    Transport { operation: String, message: String },

    #[error("Accepted response for '{operation}' is missing the Location header")]
    MissingPollTarget { operation: String },

    #[error("Long-running operation for '{item}' ended with status '{state}'")]
    OperationTerminated { item: String, state: OperationState },

    #[error("Environment '{name}' publish finished with state '{state}'")]
    EnvironmentPublishFailed { name: String, state: String },

    #[error("Unexpected response for '{operation}': {reason}")]
    UnexpectedResponse { operation: String, reason: String },

    #[error("Invalid artifact '{path}': {reason}")]
    InvalidArtifact { path: String, reason: String },

    #[error("Error during {phase}: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<DeployError>,
    },

    #[error("{}", .0.join("; "))]
    Aggregated(Vec<String>),
}

impl DeployError {
    /// Wrap an error with the phase it happened in
    pub fn in_phase(self, phase: Phase) -> Self {
        Self::Phase {
            phase,
            source: Box::new(self),
        }
    }

    pub fn remote(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: error.to_string(),
        }
    }
}

pub type DeployResult<T> = std::result::Result<T, DeployError>;
