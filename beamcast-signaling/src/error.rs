use thiserror::Error;

/// Failures surfaced by the signaling core.
///
/// Every variant that reaches a client is converted into an `error` event
/// carrying [`SignalingError::code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Capacity(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Stable machine-readable code sent with the `error` event
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Capacity(_) => "CAPACITY_EXCEEDED",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMessage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SignalingError::Validation(String::new()).code(), "VALIDATION_ERROR");
        assert_eq!(SignalingError::Conflict(String::new()).code(), "CONFLICT");
        assert_eq!(SignalingError::NotFound(String::new()).code(), "NOT_FOUND");
        assert_eq!(SignalingError::Capacity(String::new()).code(), "CAPACITY_EXCEEDED");
        assert_eq!(SignalingError::ConnectionClosed.code(), "CONNECTION_CLOSED");
        assert_eq!(SignalingError::Internal(String::new()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_json_error_maps_to_invalid_message() {
        let err: SignalingError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), "INVALID_MESSAGE");
    }
}
