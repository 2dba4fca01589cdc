use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    FeedSubscription,
    RemoteWrite,
    Validation,
    SummaryGeneration,
}

/// Rejection of a device command before any I/O happens.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown device key '{0}'")]
    UnknownDevice(String),
    #[error("device key '{0}' is not a light")]
    NotALight(String),
    #[error("unknown light status '{0}', expected on, off or auto")]
    UnknownLightStatus(String),
    #[error("ldr intensity {0} is outside 0..=100")]
    IntensityOutOfRange(f64),
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_as_snake_case() {
        let encoded = serde_json::to_string(&ErrorCode::FeedSubscription).expect("json");
        assert_eq!(encoded, "\"feed_subscription\"");
    }

    #[test]
    fn validation_messages_name_the_offending_input() {
        let err = ValidationError::UnknownDevice("lightBogus".into());
        assert_eq!(err.to_string(), "unknown device key 'lightBogus'");
        assert_eq!(err.code(), ErrorCode::Validation);
    }
}
