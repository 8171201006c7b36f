use std::num::ParseIntError;

use thiserror::Error;

use crate::envelope::PayloadError;
use crate::store::StorageError;

/// Which side of the boundary an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The event itself is unusable. Never retried, never mutates storage.
    ClientInput,
    /// Processing failed for reasons unrelated to the event. Safe to retry the whole event.
    SystemFault,
}

/// Enumeration of errors that stop the pipeline for a single event.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing deviceType in user properties")]
    MissingDeviceType,
    #[error("unsupported device type {0:?}")]
    UnsupportedDeviceType(String),
    #[error("missing {0} in user properties")]
    MissingIdentifier(&'static str),
    #[error("invalid {key} format {value:?}: {source}")]
    MalformedIdentifier {
        key: &'static str,
        value: String,
        source: ParseIntError,
    },
    #[error("{key} must be positive, got {value}")]
    NonPositiveIdentifier { key: &'static str, value: i64 },
    #[error("invalid payload format: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Storage(_) => ErrorClass::SystemFault,
            PipelineError::MissingDeviceType
            | PipelineError::UnsupportedDeviceType(_)
            | PipelineError::MissingIdentifier(_)
            | PipelineError::MalformedIdentifier { .. }
            | PipelineError::NonPositiveIdentifier { .. }
            | PipelineError::InvalidPayload(_) => ErrorClass::ClientInput,
        }
    }

    /// Short label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            PipelineError::MissingDeviceType => "missing_device_type",
            PipelineError::UnsupportedDeviceType(_) => "unsupported_device_type",
            PipelineError::MissingIdentifier(_) => "missing_identifier",
            PipelineError::MalformedIdentifier { .. } => "malformed_identifier",
            PipelineError::NonPositiveIdentifier { .. } => "invalid_identifier",
            PipelineError::InvalidPayload(_) => "invalid_payload",
            PipelineError::Storage(_) => "storage_error",
        }
    }
}

impl From<PayloadError> for PipelineError {
    fn from(error: PayloadError) -> Self {
        PipelineError::InvalidPayload(error.0.to_string())
    }
}

/// Errors raised while wiring reconcilers at startup. All of them are fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a reconciler is already registered for device type {0:?}")]
    DuplicateDeviceType(String),
    #[error("no reconciler was registered")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_input_errors_are_not_system_faults() {
        let errors = [
            PipelineError::MissingDeviceType,
            PipelineError::UnsupportedDeviceType("unknown-type".to_owned()),
            PipelineError::MissingIdentifier("roomId"),
            PipelineError::MalformedIdentifier {
                key: "roomId",
                value: "abc".to_owned(),
                source: "abc".parse::<i64>().unwrap_err(),
            },
            PipelineError::NonPositiveIdentifier {
                key: "deviceId",
                value: 0,
            },
            PipelineError::InvalidPayload("expected value".to_owned()),
        ];

        for error in errors {
            assert_eq!(error.class(), ErrorClass::ClientInput, "{error}");
        }
    }

    #[test]
    fn storage_errors_are_system_faults() {
        let error = PipelineError::from(StorageError::ConnectionError {
            error: sqlx::Error::PoolTimedOut,
        });

        assert_eq!(error.class(), ErrorClass::SystemFault);
        assert_eq!(error.outcome(), "storage_error");
    }

    #[test]
    fn messages_name_the_offending_key() {
        let error = PipelineError::MalformedIdentifier {
            key: "roomId",
            value: "12a".to_owned(),
            source: "12a".parse::<i64>().unwrap_err(),
        };

        assert_eq!(
            error.to_string(),
            "invalid roomId format \"12a\": invalid digit found in string"
        );
    }
}
