//! Error types for the dispatch engine.
//!
//! Only configuration problems, gateway connection failures and storage
//! failures are errors. A token the remote service rejects, or a send that
//! simply did not go through, is reported as a [`SendOutcome`] instead.
//!
//! [`SendOutcome`]: crate::transport::SendOutcome

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the registry, the transports and the reconciler.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A credential needed by a transport is not configured.
    #[error("Missing configuration setting: {0}")]
    MissingSetting(&'static str),

    /// Client certificate is absent, unreadable or rejected by the TLS stack.
    #[error("Certificate {} is either empty or not readable: {reason}", path.display())]
    InvalidCertificate {
        /// Configured certificate path.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// Provider signing key is absent, unreadable or not a P-256 key.
    #[error("Signing key {} is either empty or not readable: {reason}", path.display())]
    InvalidSigningKey {
        /// Configured key path.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// Broadcast API key is shorter than the service accepts.
    #[error("Invalid broadcast API key")]
    InvalidApiKey,

    /// The HTTP stack cannot provide a multiplexed HTTP/2 client.
    #[error("HTTP/2 transport unavailable: {0}")]
    Http2Unavailable(String),

    /// The gateway connection could not be established.
    #[error("Cannot connect to gateway: {gateway}.")]
    Gateway {
        /// `host:port` or URL of the gateway.
        gateway: String,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// The backing token store failed.
    #[error("Token storage failure: {0}")]
    Storage(String),
}

impl DispatchError {
    /// Whether this error belongs to the configuration class.
    ///
    /// Configuration errors abort a whole `notify` call; everything else is
    /// scoped to a single send or registry operation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingSetting(_)
                | Self::InvalidCertificate { .. }
                | Self::InvalidSigningKey { .. }
                | Self::InvalidApiKey
                | Self::Http2Unavailable(_)
        )
    }

    pub(crate) fn gateway(gateway: impl Into<String>, source: std::io::Error) -> Self {
        Self::Gateway {
            gateway: gateway.into(),
            source,
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_class() {
        assert!(DispatchError::InvalidApiKey.is_configuration());
        assert!(DispatchError::MissingSetting("apns_key_id").is_configuration());
        assert!(!DispatchError::Storage("disk full".into()).is_configuration());

        let err = DispatchError::gateway(
            "gateway.push.apple.com:2195",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
        );
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_gateway_message() {
        let err = DispatchError::gateway(
            "gateway.push.apple.com:2195",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(
            err.to_string(),
            "Cannot connect to gateway: gateway.push.apple.com:2195."
        );
    }
}
