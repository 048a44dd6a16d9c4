//! Binary gateway transport (certificate-authenticated, command 2 frames).
//!
//! Wire format, all integers big-endian:
//!
//! ```text
//! [u8 command=2] [u32 frame length] [items...]
//!
//! item: [u8 id] [u16 length] [value]
//!   1  device token     32 bytes
//!   2  payload          JSON
//!   3  identifier       u32
//!   4  expiration       u32 (unix seconds)
//!   5  priority         u8 (10 immediate, 5 power-conserving)
//!
//! error response: [u8 command=8] [u8 status] [u32 identifier]
//! ```
//!
//! The gateway answers only on error. After each write the transport waits
//! briefly for an error frame; silence inside that window counts as
//! delivered. An error that arrives after the window is missed, so a
//! delivered count from this transport is an upper bound.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use openssl::ssl::SslStream;

use super::{DeviceTransport, GatewayTls, SendOutcome};
use crate::config::ApnsCertificateSettings;
use crate::constants::{
    APNS_GATEWAY_PORT, APNS_GATEWAY_PRODUCTION, APNS_GATEWAY_SANDBOX, ERROR_FRAME_WAIT,
    LEGACY_MAX_PAYLOAD, NOTIFICATION_EXPIRY_SECS, TLS_CONNECT_TIMEOUT,
};
use crate::error::Result;
use crate::notification::Notification;
use crate::token::{self, DeviceToken, Mode};

/// Command byte of a notification frame.
pub const COMMAND_NOTIFICATION: u8 = 2;

/// Command byte of an error response.
pub const COMMAND_ERROR: u8 = 8;

/// Size of an error response.
pub const ERROR_RESPONSE_LEN: usize = 6;

/// Item identifiers inside a notification frame.
pub mod item {
    /// Device token.
    pub const DEVICE_TOKEN: u8 = 1;
    /// JSON payload.
    pub const PAYLOAD: u8 = 2;
    /// Notification identifier.
    pub const IDENTIFIER: u8 = 3;
    /// Expiration date.
    pub const EXPIRATION: u8 = 4;
    /// Priority.
    pub const PRIORITY: u8 = 5;
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Send immediately.
    Immediate,
    /// Send at a time that conserves device power.
    PowerConserving,
}

impl Priority {
    /// Wire value.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Immediate => 10,
            Self::PowerConserving => 5,
        }
    }

    /// Priority for the `immediate` flag.
    pub fn from_immediate(immediate: bool) -> Self {
        if immediate {
            Self::Immediate
        } else {
            Self::PowerConserving
        }
    }
}

/// Encode one notification frame.
pub fn encode_frame(
    device_token: &[u8; 32],
    payload: &[u8],
    identifier: u32,
    expiration: u32,
    priority: Priority,
) -> Vec<u8> {
    let mut items = Vec::with_capacity(5 * 3 + 32 + payload.len() + 4 + 4 + 1);
    push_item(&mut items, item::DEVICE_TOKEN, device_token);
    push_item(&mut items, item::PAYLOAD, payload);
    push_item(&mut items, item::IDENTIFIER, &identifier.to_be_bytes());
    push_item(&mut items, item::EXPIRATION, &expiration.to_be_bytes());
    push_item(&mut items, item::PRIORITY, &[priority.as_byte()]);

    let mut frame = Vec::with_capacity(5 + items.len());
    frame.push(COMMAND_NOTIFICATION);
    frame.extend_from_slice(&(items.len() as u32).to_be_bytes());
    frame.extend_from_slice(&items);
    frame
}

fn push_item(buf: &mut Vec<u8>, id: u8, value: &[u8]) {
    buf.push(id);
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

/// Decoded error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Command byte (8 for a well-formed response).
    pub command: u8,
    /// Status code.
    pub status: u8,
    /// Identifier of the notification the error refers to.
    pub identifier: u32,
}

impl ErrorResponse {
    /// Decode the 6-byte response.
    pub fn parse(buf: &[u8; ERROR_RESPONSE_LEN]) -> Self {
        Self {
            command: buf[0],
            status: buf[1],
            identifier: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
        }
    }

    /// Apple's description of the status code.
    pub fn status_text(&self) -> &'static str {
        match self.status {
            0 => "No errors encountered",
            1 => "Processing error",
            2 => "Missing device token",
            3 => "Missing topic",
            4 => "Missing payload",
            5 => "Invalid token size",
            6 => "Invalid topic size",
            7 => "Invalid payload size",
            8 => "Invalid token",
            10 => "Shutdown",
            128 => "Protocol error",
            _ => "None (unknown)",
        }
    }
}

/// Wait up to the stream's read timeout for an error response.
///
/// `Ok(None)` means the gateway stayed silent, which is the success path.
pub fn read_error_response<R: Read>(reader: &mut R) -> io::Result<Option<ErrorResponse>> {
    let mut buf = [0u8; ERROR_RESPONSE_LEN];
    let mut filled = 0;

    while filled < ERROR_RESPONSE_LEN {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("gateway closed the connection after {filled} bytes"),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) && filled == 0 => return Ok(None),
            Err(e) => return Err(e),
        }
    }

    Ok(Some(ErrorResponse::parse(&buf)))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Opens authenticated connections to the binary gateway.
pub trait GatewayConnector: Send + Sync {
    /// Connection type.
    type Stream: Read + Write + Send;

    /// Open a connection to the gateway for `mode`.
    fn open(&self, mode: Mode) -> Result<Self::Stream>;

    /// Bound the next reads on `stream` to `timeout`.
    fn set_read_timeout(&self, _stream: &mut Self::Stream, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

impl GatewayConnector for GatewayTls {
    type Stream = SslStream<TcpStream>;

    fn open(&self, mode: Mode) -> Result<Self::Stream> {
        let host = if mode.is_production() {
            APNS_GATEWAY_PRODUCTION
        } else {
            APNS_GATEWAY_SANDBOX
        };
        self.connect(host, APNS_GATEWAY_PORT, TLS_CONNECT_TIMEOUT)
    }

    fn set_read_timeout(&self, stream: &mut Self::Stream, timeout: Duration) -> io::Result<()> {
        stream.get_ref().set_read_timeout(Some(timeout))
    }
}

/// Binary gateway transport.
///
/// Keeps one authenticated connection per gateway and reuses it across
/// sends. A connection is dropped after any write failure or error response,
/// since the gateway closes it on its side too.
pub struct LegacyBinaryTransport<C: GatewayConnector = GatewayTls> {
    connector: C,
    pacing: Duration,
    connections: Mutex<HashMap<Mode, C::Stream>>,
}

impl<C: GatewayConnector> std::fmt::Debug for LegacyBinaryTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyBinaryTransport")
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

impl LegacyBinaryTransport<GatewayTls> {
    /// Load the certificate and build the transport.
    pub fn new(settings: &ApnsCertificateSettings) -> Result<Self> {
        Ok(Self::with_connector(GatewayTls::from_settings(settings)?, settings.pacing))
    }
}

impl<C: GatewayConnector> LegacyBinaryTransport<C> {
    /// Build the transport around an already-configured connector.
    pub fn with_connector(connector: C, pacing: Duration) -> Self {
        Self {
            connector,
            pacing,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn write_frame(&self, mode: Mode, frame: &[u8]) -> Result<SendOutcome> {
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);

        let reused = connections.contains_key(&mode);
        if !reused {
            connections.insert(mode, self.connector.open(mode)?);
        }

        let Some(stream) = connections.get_mut(&mode) else {
            return Ok(SendOutcome::Failed);
        };

        if let Err(e) = stream.write_all(frame).and_then(|()| stream.flush()) {
            connections.remove(&mode);
            if !reused {
                log::warn!("[Apns] Write to {} gateway failed: {}", mode, e);
                return Ok(SendOutcome::Failed);
            }
            // A reused connection may have been closed by the gateway while idle.
            log::debug!("[Apns] Reconnecting after stale connection: {}", e);
            drop(connections);
            return self.write_frame(mode, frame);
        }

        let outcome = match self.await_error(stream) {
            Ok(None) => SendOutcome::Delivered,
            Ok(Some(response)) => {
                log::warn!(
                    "[Apns] Gateway rejected notification {}: {} (status {})",
                    response.identifier,
                    response.status_text(),
                    response.status
                );
                connections.remove(&mode);
                SendOutcome::Failed
            }
            Err(e) => {
                log::warn!("[Apns] Reading gateway response failed: {}", e);
                connections.remove(&mode);
                SendOutcome::Failed
            }
        };
        Ok(outcome)
    }

    fn await_error(&self, stream: &mut C::Stream) -> io::Result<Option<ErrorResponse>> {
        self.connector.set_read_timeout(stream, ERROR_FRAME_WAIT)?;
        let response = read_error_response(stream);
        self.connector.set_read_timeout(stream, TLS_CONNECT_TIMEOUT)?;
        response
    }
}

impl<C: GatewayConnector> DeviceTransport for LegacyBinaryTransport<C> {
    fn name(&self) -> &'static str {
        "apns-binary"
    }

    fn send(&self, device: &DeviceToken, notification: &Notification) -> Result<SendOutcome> {
        let Some(raw_token) = token::decode_apns(&device.token) else {
            log::warn!("[Apns] Not a binary-gateway token: {}", token::short(&device.token));
            return Ok(SendOutcome::Failed);
        };

        let payload = notification.legacy_payload().to_string();
        if payload.len() > LEGACY_MAX_PAYLOAD {
            log::warn!(
                "[Apns] Payload of notification {} is {} bytes, limit is {}",
                notification.id,
                payload.len(),
                LEGACY_MAX_PAYLOAD
            );
            return Ok(SendOutcome::Failed);
        }

        let expiration = Utc::now().timestamp() + NOTIFICATION_EXPIRY_SECS;
        let frame = encode_frame(
            &raw_token,
            payload.as_bytes(),
            notification.id,
            u32::try_from(expiration).unwrap_or(u32::MAX),
            Priority::from_immediate(true),
        );

        let outcome = self.write_frame(device.mode, &frame)?;
        log::debug!(
            "[Apns] Notification {} to {}: {:?}",
            notification.id,
            token::short(&device.token),
            outcome
        );
        Ok(outcome)
    }

    fn pacing(&self) -> Option<Duration> {
        Some(self.pacing)
    }
}
