use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the autofocus controller and its adapters.
#[derive(Debug, Error)]
pub enum AutofocusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection fault on {host}: {message}")]
    ConnectionFault { host: String, message: String },

    #[error("Actuator fault on mcam {mcam_id}: {message}")]
    ActuatorFault { mcam_id: u32, message: String },

    #[error("Stream fault on mcam {mcam_id} (port {port}): {message}")]
    StreamFault {
        mcam_id: u32,
        port: u16,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutofocusError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFault {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn actuator(mcam_id: u32, message: impl Into<String>) -> Self {
        Self::ActuatorFault {
            mcam_id,
            message: message.into(),
        }
    }

    /// The per-camera failure reason this error maps to in a result.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::ConnectionFault { .. } => FailureReason::ConnectionFault,
            Self::ActuatorFault { .. } => FailureReason::ActuatorFault,
            Self::StreamFault { .. } => FailureReason::StreamFault,
            Self::Cancelled => FailureReason::Cancelled,
            Self::Config(_) | Self::Io(_) => FailureReason::Internal,
        }
    }
}

/// Recoverable failure to obtain a scorable frame.
///
/// Never propagated as an error: the search engine skips the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AcquisitionFailure {
    #[error("no frame arrived before the grab timeout")]
    GrabTimeout,
    #[error("frame buffer could not be decoded")]
    DecodeFailed,
    #[error("decoded frame has zero size")]
    EmptyImage,
    #[error("sharpness metric is not a finite non-negative number")]
    InvalidMetric,
}

/// Outcome classification carried by a camera's search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ActuatorFault,
    AcquisitionFailure,
    ConnectionFault,
    StreamFault,
    Cancelled,
    Internal,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::ActuatorFault => "actuator fault",
            FailureReason::AcquisitionFailure => "acquisition failure",
            FailureReason::ConnectionFault => "connection fault",
            FailureReason::StreamFault => "stream fault",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal => "internal error",
        };
        f.write_str(s)
    }
}
