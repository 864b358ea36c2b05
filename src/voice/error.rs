use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceTurnError {
    /// No backend address resolved; raised before any network attempt
    #[error("No backend URL is configured for voice.")]
    NotConfigured,

    #[error("The voice request exceeded its {}s time budget.", .0.as_secs())]
    DeadlineExceeded(Duration),

    #[error("The voice request was cancelled.")]
    Cancelled,

    /// Non-success response; `message` comes from the body or the status code
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Could not reach the voice service: {0}")]
    Network(String),

    #[error("Could not build the voice request: {0}")]
    InvalidRequest(String),
}

impl VoiceTurnError {
    pub fn is_deadline(&self) -> bool {
        matches!(self, VoiceTurnError::DeadlineExceeded(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            VoiceTurnError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_displays_backend_message() {
        let err = VoiceTurnError::Http {
            status: 400,
            message: "audio too short".to_string(),
        };
        assert_eq!(err.to_string(), "audio too short");
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_deadline_is_distinct() {
        let err = VoiceTurnError::DeadlineExceeded(Duration::from_secs(30));
        assert!(err.is_deadline());
        assert_eq!(err.to_string(), "The voice request exceeded its 30s time budget.");
        assert!(!VoiceTurnError::Cancelled.is_deadline());
    }
}
