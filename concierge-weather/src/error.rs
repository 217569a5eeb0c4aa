//! Error taxonomy shared by every layer of the weather service.

use serde::Serialize;
use thiserror::Error;

use crate::provider::ProviderId;

/// Message shown to end users whenever weather cannot be produced.
pub const UNAVAILABLE_MESSAGE: &str = "Weather information is currently unavailable.";

/// Coarse classification used by the retry wrapper and the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    RateLimited,
    UpstreamUnavailable,
    ConfigurationInvalid,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum WeatherError {
    /// Invalid coordinates, rejected credentials, or a request the upstream refused.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: ProviderId,
        retry_after_secs: Option<u64>,
    },

    /// Upstream 5xx, transport failure, timeout, or an unusable payload.
    #[error("{provider} unavailable: {reason}")]
    UpstreamUnavailable { provider: ProviderId, reason: String },

    #[error("circuit breaker open for {provider}")]
    CircuitOpen { provider: ProviderId },

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("request cancelled")]
    Cancelled,
}

impl WeatherError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }

    pub fn unavailable(provider: ProviderId, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            provider,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::UpstreamUnavailable { .. } | Self::CircuitOpen { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            Self::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt against the same upstream can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::UpstreamUnavailable { .. })
    }

    /// Whether this failure says something about upstream health.
    ///
    /// A breaker rejection is not itself a new failure, and a `BadRequest`
    /// proves the upstream answered.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::UpstreamUnavailable { .. })
    }

    /// User-facing text. Never exposes upstream error bodies.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ConfigurationInvalid(_) => "Weather service is not configured.",
            _ => UNAVAILABLE_MESSAGE,
        }
    }
}
