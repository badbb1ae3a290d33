use thiserror::Error;

/// Caller mistakes caught before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Please upload an image first.")]
    MissingImage,
    #[error("Please provide the {0} credential.")]
    MissingCredential(&'static str),
}

/// `Display` is the user-safe message; `detail` stays internal and is only
/// ever logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{user_message}")]
pub struct GenerativeFailure {
    pub user_message: String,
    pub detail: String,
}

impl GenerativeFailure {
    pub fn new(user_message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            detail: detail.into(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new("The analysis service could not be reached.", detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{user_message}")]
pub struct ClassifierFailure {
    pub user_message: String,
    pub detail: String,
}

impl ClassifierFailure {
    pub fn new(user_message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            detail: detail.into(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new("Connection error. Please try again.", detail)
    }

    pub fn status(code: u16, body_excerpt: impl Into<String>) -> Self {
        Self::new(
            "Unable to analyze image at the moment.",
            format!("classifier returned {code}: {}", body_excerpt.into()),
        )
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new("Unable to analyze image at the moment.", detail)
    }
}

/// The gate is fail-closed: every variant collapses into a rejected verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateFailure {
    #[error("{0}")]
    Endpoint(GenerativeFailure),
    #[error("Image validation failed. Please try again.")]
    UnparseableReply { detail: String },
    #[error("Image validation failed. Please try again.")]
    MissingVerdictField { field: String },
}

/// Always absorbed into the fixed fallback advisory; never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvisoryFailure {
    #[error("{0}")]
    Endpoint(GenerativeFailure),
    #[error("advisory reply was empty")]
    EmptyReply,
}

#[cfg(test)]
mod tests {
    use super::{ClassifierFailure, GateFailure, GenerativeFailure, InputError};

    #[test]
    fn display_is_the_user_safe_message_only() {
        let failure = ClassifierFailure::transport("connect timeout to 10.0.0.1:443");
        assert_eq!(failure.to_string(), "Connection error. Please try again.");
        assert!(failure.detail.contains("connect timeout"));
    }

    #[test]
    fn status_failure_keeps_code_in_detail() {
        let failure = ClassifierFailure::status(503, "upstream unavailable");
        assert_eq!(
            failure.to_string(),
            "Unable to analyze image at the moment."
        );
        assert!(failure.detail.contains("503"));
    }

    #[test]
    fn gate_failure_variants_never_leak_detail() {
        let endpoint = GateFailure::Endpoint(GenerativeFailure::transport("dns error"));
        assert!(!endpoint.to_string().contains("dns"));
        let unparseable = GateFailure::UnparseableReply {
            detail: "trailing garbage".to_string(),
        };
        assert_eq!(
            unparseable.to_string(),
            "Image validation failed. Please try again."
        );
    }

    #[test]
    fn input_errors_name_the_missing_piece() {
        assert_eq!(
            InputError::MissingCredential("classifier").to_string(),
            "Please provide the classifier credential."
        );
        assert_eq!(
            InputError::MissingImage.to_string(),
            "Please upload an image first."
        );
    }
}
