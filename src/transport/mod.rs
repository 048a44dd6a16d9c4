//! Push gateway transports.
//!
//! Three wire protocols, one per remote service generation:
//!
//! ```text
//! Platform-A (64 hex chars)
//!     ├─ apns_http    HTTP/2 POST per device, bearer JWT (ES256)
//!     └─ apns_binary  TLV frame over a client-certificate TLS socket
//!
//! Platform-B (any other token)
//!     └─ broadcast    one JSON POST per notify call, per-token result array
//! ```
//!
//! Per-device transports implement [`DeviceTransport`]; the broadcast
//! protocol implements [`BatchTransport`]. Neither touches the registry:
//! they report tokens the service rejected and the dispatcher unregisters
//! them.

pub mod apns_binary;
pub mod apns_http;
pub mod broadcast;
pub mod jwt;
pub mod tls;

use std::time::Duration;

pub use apns_binary::{GatewayConnector, LegacyBinaryTransport};
pub use apns_http::ApnsHttpTransport;
pub use broadcast::BroadcastTransport;
pub use jwt::ProviderTokenSigner;
pub use tls::GatewayTls;

use crate::error::Result;
use crate::notification::Notification;
use crate::token::DeviceToken;

/// Result of one send attempt that reached (or tried to reach) the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The service accepted the notification.
    Delivered,
    /// The service reported the token invalid; it should be unregistered.
    Rejected,
    /// Not delivered for another reason; the token is kept.
    Failed,
}

impl SendOutcome {
    /// Contribution to the delivered count.
    pub fn delivered(self) -> usize {
        usize::from(self == Self::Delivered)
    }
}

/// Sends one notification to one device.
pub trait DeviceTransport: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Deliver `notification` to `device`.
    ///
    /// Only configuration problems and connection failures are errors.
    fn send(&self, device: &DeviceToken, notification: &Notification) -> Result<SendOutcome>;

    /// Pause the dispatcher must observe after each send.
    fn pacing(&self) -> Option<Duration> {
        None
    }
}

/// Aggregate result of one broadcast request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Tokens the service reports delivered.
    pub delivered: usize,
    /// Tokens the service reports as no longer registered.
    pub rejected: Vec<String>,
}

/// Sends one notification to many devices in a single request.
pub trait BatchTransport: Send + Sync {
    /// Fail fast on configuration problems, before any network attempt.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver `notification` to every token in `tokens`.
    fn send_batch(&self, tokens: &[String], notification: &Notification) -> Result<BatchOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counts() {
        assert_eq!(SendOutcome::Delivered.delivered(), 1);
        assert_eq!(SendOutcome::Rejected.delivered(), 0);
        assert_eq!(SendOutcome::Failed.delivered(), 0);
    }
}
