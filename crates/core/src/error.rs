use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The per-chat token bucket is empty.
    #[error("Rate limited: chat {0}")]
    RateLimited(String),

    /// A single provider call failed. `retryable` marks network errors,
    /// timeouts, 5xx and 429 responses.
    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    /// Retry budget exhausted against the active provider.
    #[error("LLM provider unavailable after {attempts} attempts: {last_error}")]
    ProviderUnavailable { attempts: u32, last_error: String },

    /// The smart-home platform could not be reached for a read.
    #[error("Discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// The smart-home platform could not be reached for a write.
    #[error("Platform unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unsupported service {domain}.{service}: {reason}")]
    UnsupportedService {
        domain: String,
        service: String,
        reason: String,
    },

    /// The platform answered a service call with an error status. `body`
    /// is kept verbatim so it can be fed back to the model.
    #[error("Platform rejected the call (HTTP {status}): {body}")]
    PlatformRejected { status: u16, body: String },

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Error::Provider {
            message: message.into(),
            retryable,
        }
    }

    /// Errors the self-correction loop feeds back to the model.
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            Error::MalformedCommand(_)
                | Error::UnknownEntity(_)
                | Error::UnsupportedService { .. }
                | Error::PlatformRejected { .. }
        )
    }

    /// Transient provider failures worth another call with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider { retryable: true, .. })
    }

    /// Short machine label used in conversation records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::RateLimited(_) => "rate_limited",
            Error::Provider { .. } => "provider",
            Error::ProviderUnavailable { .. } => "provider_unavailable",
            Error::DiscoveryUnavailable(_) => "discovery_unavailable",
            Error::PlatformUnavailable(_) => "platform_unavailable",
            Error::MalformedCommand(_) => "malformed_command",
            Error::UnknownEntity(_) => "unknown_entity",
            Error::UnsupportedService { .. } => "unsupported_service",
            Error::PlatformRejected { .. } => "platform_rejected",
            Error::NotConfigured(_) => "not_configured",
            Error::Channel(_) => "channel",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correctable_set() {
        assert!(Error::MalformedCommand("x".into()).is_correctable());
        assert!(Error::UnknownEntity("light.x".into()).is_correctable());
        assert!(Error::PlatformRejected {
            status: 400,
            body: "bad".into()
        }
        .is_correctable());
        assert!(!Error::DiscoveryUnavailable("down".into()).is_correctable());
        assert!(!Error::ProviderUnavailable {
            attempts: 3,
            last_error: "timeout".into()
        }
        .is_correctable());
    }

    #[test]
    fn test_rejection_keeps_raw_body() {
        let err = Error::PlatformRejected {
            status: 400,
            body: "{\"message\":\"Service not found.\"}".into(),
        };
        assert!(err.to_string().contains("{\"message\":\"Service not found.\"}"));
    }

    #[test]
    fn test_retryable_only_for_transient_provider_errors() {
        assert!(Error::provider("timeout", true).is_retryable());
        assert!(!Error::provider("401 unauthorized", false).is_retryable());
        assert!(!Error::Other("x".into()).is_retryable());
    }
}
