//! Application-wide constants for push-dispatch.
//!
//! Gateway endpoints, timeouts and protocol limits live here so the
//! transports and the registry agree on them. Constants are grouped by
//! domain.
//!
//! # Categories
//!
//! - **Gateways**: Remote hosts and ports for each push service
//! - **Timeouts**: Network and pacing intervals
//! - **Protocol**: Wire-format limits and lifetimes
//! - **Registry**: Token retention

use std::time::Duration;

// ============================================================================
// Gateways
// ============================================================================

/// Binary gateway host for production tokens.
pub const APNS_GATEWAY_PRODUCTION: &str = "gateway.push.apple.com";

/// Binary gateway host for development (sandbox) tokens.
pub const APNS_GATEWAY_SANDBOX: &str = "gateway.sandbox.push.apple.com";

/// Port of the binary gateway.
pub const APNS_GATEWAY_PORT: u16 = 2195;

/// Feedback service host for production tokens.
pub const APNS_FEEDBACK_PRODUCTION: &str = "feedback.push.apple.com";

/// Feedback service host for development (sandbox) tokens.
pub const APNS_FEEDBACK_SANDBOX: &str = "feedback.sandbox.push.apple.com";

/// Port of the feedback service.
pub const APNS_FEEDBACK_PORT: u16 = 2196;

/// Provider API base URL for production tokens.
pub const APNS_API_PRODUCTION: &str = "https://api.push.apple.com";

/// Provider API base URL for development (sandbox) tokens.
pub const APNS_API_SANDBOX: &str = "https://api.sandbox.push.apple.com";

/// Broadcast endpoint for Platform-B tokens (FCM legacy HTTP protocol).
pub const BROADCAST_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

// ============================================================================
// Timeouts
// ============================================================================

/// Connect timeout for the binary gateway and the feedback service.
pub const TLS_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the binary transport waits for an error frame after a write.
///
/// The gateway only answers on error, so an empty read inside this window
/// counts as delivered. Errors arriving later are missed.
pub const ERROR_FRAME_WAIT: Duration = Duration::from_millis(250);

/// Read timeout while draining the feedback stream.
pub const FEEDBACK_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default HTTP request timeout in seconds for the provider and broadcast APIs.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default pause after each binary-gateway send, in milliseconds.
///
/// Rapid reconnects to the binary gateway are treated as abuse.
pub const DEFAULT_LEGACY_PACING_MS: u64 = 500;

// ============================================================================
// Protocol
// ============================================================================

/// Lifetime of a notification on the gateway (seconds from now).
pub const NOTIFICATION_EXPIRY_SECS: i64 = 86_400;

/// How long a minted provider JWT is reused before signing a fresh one.
///
/// Apple rejects tokens older than an hour and throttles refreshes more
/// frequent than every 20 minutes.
pub const JWT_REFRESH_INTERVAL: Duration = Duration::from_secs(45 * 60);

/// Largest payload accepted by the binary gateway, in bytes.
pub const LEGACY_MAX_PAYLOAD: usize = 2048;

/// Minimum accepted length of a broadcast API key.
pub const MIN_API_KEY_LEN: usize = 8;

/// Size of one feedback record: timestamp (4), token length (2), token (32).
pub const FEEDBACK_RECORD_LEN: usize = 38;

// ============================================================================
// Registry
// ============================================================================

/// Tokens not refreshed for this many months are purged.
pub const STALE_TOKEN_MONTHS: u32 = 3;
