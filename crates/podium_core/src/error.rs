use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Unified error type for podium operations
#[derive(Debug, Error)]
pub enum PodiumError {
    /// Malformed block descriptor or prop, rejected before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A concurrent save for the same website was detected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage backends failed (for uploads: both primary and fallback).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A block or website vanished between request and processing.
    #[error("{0} not found")]
    NotFound(String),

    /// Transport failure observed by a client.
    #[error("Network error: {0}")]
    Network(String),

    // Transport errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for podium operations
pub type Result<T> = std::result::Result<T, PodiumError>;

/// Coarse classification used for UI messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ErrorKind {
    Validation,
    Conflict,
    Storage,
    NotFound,
    Network,
}

impl ErrorKind {
    /// Parse the wire name of a kind, falling back to `Network` for unknown names.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "validation" => ErrorKind::Validation,
            "conflict" => ErrorKind::Conflict,
            "storage" => ErrorKind::Storage,
            "not_found" => ErrorKind::NotFound,
            _ => ErrorKind::Network,
        }
    }
}

impl PodiumError {
    /// Classify this error into the taxonomy shared by server and clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PodiumError::Validation(_) | PodiumError::Json(_) => ErrorKind::Validation,
            PodiumError::Conflict(_) => ErrorKind::Conflict,
            PodiumError::Storage(_) | PodiumError::Io(_) => ErrorKind::Storage,
            PodiumError::NotFound(_) => ErrorKind::NotFound,
            PodiumError::Network(_) => ErrorKind::Network,
        }
    }

    /// Rebuild an error from its wire representation.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Validation => PodiumError::Validation(message),
            ErrorKind::Conflict => PodiumError::Conflict(message),
            ErrorKind::Storage => PodiumError::Storage(message),
            ErrorKind::NotFound => PodiumError::NotFound(message),
            ErrorKind::Network => PodiumError::Network(message),
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            PodiumError::Validation(msg)
            | PodiumError::Conflict(msg)
            | PodiumError::Storage(msg)
            | PodiumError::NotFound(msg)
            | PodiumError::Network(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Convert to a serializable representation
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

/// A serializable representation of PodiumError for HTTP bodies and UI state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SerializableError {
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl From<&PodiumError> for SerializableError {
    fn from(err: &PodiumError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message(),
        }
    }
}

impl From<PodiumError> for SerializableError {
    fn from(err: PodiumError) -> Self {
        SerializableError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            PodiumError::Validation("missing type".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PodiumError::NotFound("Block 42".into()).kind(),
            ErrorKind::NotFound
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(PodiumError::from(io).kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_serializable_round_trip_kind() {
        let err = PodiumError::Conflict("save in progress".into());
        let ser = err.to_serializable();
        let json = serde_json::to_string(&ser).unwrap();
        assert!(json.contains("\"kind\":\"conflict\""));

        let rebuilt = PodiumError::from_kind(ErrorKind::from_wire("conflict"), ser.message);
        assert_eq!(rebuilt.kind(), ErrorKind::Conflict);
    }
}
