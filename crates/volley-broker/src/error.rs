//! Broker error taxonomy and HTTP outcome classification.

use thiserror::Error;

/// Common error type returned by broker adapters.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport failure: connection reset, DNS, timeout.
    #[error("network error: {0}")]
    Network(String),
    /// Credentials rejected. Never retried here; the operator rotates the
    /// access token out of band.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Broker throttling.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Client-side request rejection.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Broker-side failure.
    #[error("broker server error: {0}")]
    Server(String),
    /// Everything else.
    #[error("unexpected broker error: {0}")]
    Unknown(String),
}

impl BrokerError {
    /// Short kind tag, as carried on execution outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::RateLimited(_) => "rate_limited",
            Self::Invalid(_) => "invalid",
            Self::Server(_) => "server",
            Self::Unknown(_) => "unknown",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Network(d)
            | Self::Auth(d)
            | Self::RateLimited(d)
            | Self::Invalid(d)
            | Self::Server(d)
            | Self::Unknown(d) => d,
        }
    }
}

/// Longest response-body excerpt carried in an error detail.
const BODY_CAP: usize = 256;

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= BODY_CAP {
        trimmed.to_string()
    } else {
        let mut end = BODY_CAP;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    }
}

/// Classify an HTTP outcome into the taxonomy.
///
/// The body is inspected as well as the status: brokers report expired
/// tokens with auth wording under generic 400s, and those must surface as
/// auth failures so the operator rotates the token instead of blaming the
/// request.
pub fn classify_http(status: u16, body: &str) -> BrokerError {
    let lowered = body.to_lowercase();
    let detail = format!("HTTP {status}: {}", excerpt(body));

    let auth_wording = lowered.contains("invalid refresh token")
        || lowered.contains("invalid access token")
        || lowered.contains("tokenexception")
        || lowered.contains("api_key")
        || (lowered.contains("token") && lowered.contains("expired"));

    match status {
        401 | 403 => BrokerError::Auth(detail),
        429 => BrokerError::RateLimited(detail),
        400..=499 if auth_wording => BrokerError::Auth(detail),
        400..=499 => BrokerError::Invalid(detail),
        500..=599 => BrokerError::Server(detail),
        _ if auth_wording => BrokerError::Auth(detail),
        _ => BrokerError::Unknown(detail),
    }
}

/// Map a transport-level failure.
pub fn classify_transport(err: &reqwest::Error) -> BrokerError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        BrokerError::Network(err.to_string())
    } else {
        BrokerError::Unknown(err.to_string())
    }
}

/// Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
