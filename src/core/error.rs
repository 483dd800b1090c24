//! Error taxonomy for calls to the generative service.

use std::time::Duration;

/// How a failure should be treated by the retry and fallback policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Missing credential or broken local setup. Never retried.
    Configuration,
    /// Rate limit, overload, temporary unavailability.
    Transient,
    /// Billing or capacity problem tied to one model tier.
    Capacity,
    /// The response did not match the expected structure.
    Parse,
    /// Anything else that will not change on retry.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Neither a project key nor a default key is configured
    MissingCredential,
    /// Non-success HTTP status from the service
    Http { status: u16, message: String },
    /// Transport failure before a status was received
    Network { message: String, transient: bool },
    /// Response body could not be interpreted
    Parse(String),
    /// Response was well-formed but carried no usable payload
    EmptyResponse(String),
    /// A long-running operation reported failure
    OperationFailed(String),
    /// A long-running operation did not finish in time
    Timeout { waited: Duration },
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::MissingCredential => write!(
                f,
                "No API key configured (set one on the project, in config.yml or GEMINI_API_KEY)"
            ),
            GenerationError::Http { status, message } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            GenerationError::Network { message, .. } => write!(f, "Network error: {}", message),
            GenerationError::Parse(msg) => write!(f, "Failed to parse response: {}", msg),
            GenerationError::EmptyResponse(msg) => write!(f, "Empty response: {}", msg),
            GenerationError::OperationFailed(msg) => write!(f, "Operation failed: {}", msg),
            GenerationError::Timeout { waited } => {
                write!(f, "Operation timed out after {}s", waited.as_secs())
            }
        }
    }
}

impl std::error::Error for GenerationError {}

impl GenerationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GenerationError::MissingCredential => ErrorClass::Configuration,
            GenerationError::Http { status, message } => classify_http(*status, message),
            GenerationError::Network { transient: true, .. } => ErrorClass::Transient,
            GenerationError::Network { .. } => ErrorClass::Permanent,
            GenerationError::Parse(_) | GenerationError::EmptyResponse(_) => ErrorClass::Parse,
            GenerationError::OperationFailed(_) | GenerationError::Timeout { .. } => {
                ErrorClass::Permanent
            }
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let transient = err.is_timeout() || err.is_connect() || err.is_request();
        GenerationError::Network {
            message: err.to_string(),
            transient,
        }
    }
}

fn mentions_billing(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["billing", "check your plan", "quota exceeded for", "limit: 0"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn classify_http(status: u16, message: &str) -> ErrorClass {
    match status {
        402 => ErrorClass::Capacity,
        429 | 403 if mentions_billing(message) => ErrorClass::Capacity,
        404 => ErrorClass::Capacity,
        408 | 429 | 500 | 502 | 503 | 504 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

/// Finds the classification of the first `GenerationError` in an error chain.
/// Errors that did not come from the service are treated as permanent.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GenerationError>())
        .map(GenerationError::class)
        .unwrap_or(ErrorClass::Permanent)
}

pub fn is_transient(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::Transient
}
