use serde_json::value::RawValue;

use crate::envelope::EventEnvelope;
use crate::error::PipelineError;

pub const DEVICE_TYPE_PROPERTY: &str = "deviceType";
pub const ROOM_ID_PROPERTY: &str = "roomId";
pub const DEVICE_ID_PROPERTY: &str = "deviceId";

/// Read the device type used to pick a reconciler.
pub fn extract_device_type(envelope: &EventEnvelope) -> Result<&str, PipelineError> {
    match envelope.property_value(DEVICE_TYPE_PROPERTY) {
        Some(device_type) if !device_type.is_empty() => Ok(device_type),
        _ => Err(PipelineError::MissingDeviceType),
    }
}

/// Parse a correlation identifier out of the user properties.
///
/// The raw value is parsed as a base-10 integer exactly as given: no trimming, no defaults.
/// Zero and negative values parse successfully; rejecting them is up to the reconciler, see
/// [`require_positive`].
pub fn extract_identifier(
    envelope: &EventEnvelope,
    key: &'static str,
) -> Result<i64, PipelineError> {
    let raw = match envelope.property_value(key) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(PipelineError::MissingIdentifier(key)),
    };

    raw.parse::<i64>()
        .map_err(|source| PipelineError::MalformedIdentifier {
            key,
            value: raw.to_owned(),
            source,
        })
}

pub fn require_positive(key: &'static str, value: i64) -> Result<i64, PipelineError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(PipelineError::NonPositiveIdentifier { key, value })
    }
}

/// Check that the payload is syntactically valid JSON of any shape.
///
/// The document is borrowed as written, so numbers keep their exact digits on the way to storage.
pub fn validate_json(payload: &str) -> Result<&RawValue, PipelineError> {
    serde_json::from_str(payload).map_err(|error| PipelineError::InvalidPayload(error.to_string()))
}
