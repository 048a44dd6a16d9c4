//! Notification dispatch.
//!
//! [`Dispatcher::notify`] fans one notification out to every device a
//! recipient has registered:
//!
//! ```text
//! tokens_for(owner) ──► classify
//!                         ├─ Apple     ─► DeviceTransport::send, one at a time, paced
//!                         └─ Broadcast ─► BatchTransport::send_batch, one request
//! ```
//!
//! Tokens a service reports invalid are unregistered here, never inside a
//! transport. Individual delivery failures never abort the call; only
//! configuration errors do, and those are checked before the first send.

use crate::config::{ApnsTransportKind, Config};
use crate::error::{DispatchError, Result};
use crate::notification::Notification;
use crate::registry::TokenRegistry;
use crate::token::{self, DeviceToken, Mode, Platform};
use crate::transport::{
    ApnsHttpTransport, BatchTransport, BroadcastTransport, DeviceTransport, LegacyBinaryTransport,
    SendOutcome,
};

/// Returned by [`Dispatcher::notify`] when the recipient has no devices.
pub const NOTHING_TO_SEND: i64 = -1;

/// Per-call delivery summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Devices the services accepted the notification for.
    pub delivered: usize,
    /// Tokens the services reported invalid (now unregistered).
    pub rejected: usize,
    /// Devices that were not reached for any other reason.
    pub failed: usize,
    /// Connection failures encountered along the way.
    pub errors: Vec<String>,
}

/// Routes notifications to the transports.
pub struct Dispatcher {
    registry: TokenRegistry,
    apple: Option<Box<dyn DeviceTransport>>,
    /// Setting named when Platform-A tokens exist but no transport is configured.
    apple_setting: &'static str,
    broadcast: Option<Box<dyn BatchTransport>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("apple", &self.apple.as_ref().map(|t| t.name()))
            .field("broadcast", &self.broadcast.is_some())
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher with no transports. Add them with the `with_*` builders.
    pub fn new(registry: TokenRegistry) -> Self {
        Self {
            registry,
            apple: None,
            apple_setting: "apns_key_path",
            broadcast: None,
        }
    }

    /// Use `transport` for Platform-A tokens.
    pub fn with_apple_transport(mut self, transport: impl DeviceTransport + 'static) -> Self {
        self.apple = Some(Box::new(transport));
        self
    }

    /// Use `transport` for Platform-B tokens.
    pub fn with_broadcast_transport(mut self, transport: impl BatchTransport + 'static) -> Self {
        self.broadcast = Some(Box::new(transport));
        self
    }

    /// Build the transports `config` has credentials for.
    ///
    /// Credentials are loaded here, so a bad certificate or signing key
    /// fails construction instead of the first send.
    pub fn from_config(config: &Config, registry: TokenRegistry) -> Result<Self> {
        let mut dispatcher = Self::new(registry);

        match config.apns_transport {
            ApnsTransportKind::Token => {
                if let Some(settings) = config.token_settings()? {
                    dispatcher = dispatcher.with_apple_transport(ApnsHttpTransport::new(settings)?);
                }
            }
            ApnsTransportKind::Binary => {
                dispatcher.apple_setting = "apns_certificate_path";
                if let Some(settings) = config.certificate_settings() {
                    dispatcher = dispatcher.with_apple_transport(LegacyBinaryTransport::new(&settings)?);
                }
            }
        }

        if let Some(settings) = config.broadcast_settings() {
            dispatcher = dispatcher.with_broadcast_transport(BroadcastTransport::new(settings)?);
        }

        log::debug!("[Dispatch] Configured {:?}", dispatcher);
        Ok(dispatcher)
    }

    /// The registry this dispatcher reads from and heals.
    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Send `notification` to every device of `owner_id`.
    ///
    /// Returns the number of devices reached, or [`NOTHING_TO_SEND`] when
    /// the recipient has none.
    pub fn notify(&self, owner_id: i64, notification: &Notification) -> Result<i64> {
        Ok(match self.notify_report(owner_id, notification)? {
            Some(report) => i64::try_from(report.delivered).unwrap_or(i64::MAX),
            None => NOTHING_TO_SEND,
        })
    }

    /// Like [`notify`](Self::notify), with the full breakdown.
    ///
    /// `None` means the recipient has no devices and nothing was sent.
    pub fn notify_report(
        &self,
        owner_id: i64,
        notification: &Notification,
    ) -> Result<Option<DispatchReport>> {
        let devices = self.registry.tokens_for(owner_id)?;
        if devices.is_empty() {
            log::debug!("[Dispatch] Owner {} has no registered devices", owner_id);
            return Ok(None);
        }

        let (apple, broadcast): (Vec<DeviceToken>, Vec<DeviceToken>) = devices
            .into_iter()
            .partition(|device| device.platform() == Platform::Apple);

        let apple_transport = if apple.is_empty() {
            None
        } else {
            Some(
                self.apple
                    .as_deref()
                    .ok_or(DispatchError::MissingSetting(self.apple_setting))?,
            )
        };
        let broadcast_transport = if broadcast.is_empty() {
            None
        } else {
            let transport = self
                .broadcast
                .as_deref()
                .ok_or(DispatchError::MissingSetting("broadcast_api_key"))?;
            transport.preflight()?;
            Some(transport)
        };

        let mut report = DispatchReport::default();

        if let Some(transport) = apple_transport {
            self.send_each(transport, &apple, notification, &mut report)?;
        }
        if let Some(transport) = broadcast_transport {
            self.send_batch(transport, &broadcast, notification, &mut report)?;
        }

        log::info!(
            "[Dispatch] Notification {} to owner {}: {} delivered, {} rejected, {} failed",
            notification.id,
            owner_id,
            report.delivered,
            report.rejected,
            report.failed
        );
        Ok(Some(report))
    }

    fn send_each(
        &self,
        transport: &dyn DeviceTransport,
        devices: &[DeviceToken],
        notification: &Notification,
        report: &mut DispatchReport,
    ) -> Result<()> {
        for device in devices {
            match transport.send(device, notification) {
                Ok(SendOutcome::Delivered) => report.delivered += 1,
                Ok(SendOutcome::Rejected) => {
                    report.rejected += 1;
                    self.forget(std::slice::from_ref(&device.token), Some(device.mode));
                }
                Ok(SendOutcome::Failed) => report.failed += 1,
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "[Dispatch] {} send to {} failed: {}",
                        transport.name(),
                        token::short(&device.token),
                        e
                    );
                    report.failed += 1;
                    report.errors.push(e.to_string());
                }
            }

            if let Some(pause) = transport.pacing() {
                std::thread::sleep(pause);
            }
        }
        Ok(())
    }

    fn send_batch(
        &self,
        transport: &dyn BatchTransport,
        devices: &[DeviceToken],
        notification: &Notification,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let tokens: Vec<String> = devices.iter().map(|d| d.token.clone()).collect();

        match transport.send_batch(&tokens, notification) {
            Ok(outcome) => {
                report.delivered += outcome.delivered;
                report.rejected += outcome.rejected.len();
                report.failed += tokens
                    .len()
                    .saturating_sub(outcome.delivered + outcome.rejected.len());
                self.forget(&outcome.rejected, None);
            }
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                log::warn!("[Dispatch] Broadcast to {} token(s) failed: {}", tokens.len(), e);
                report.failed += tokens.len();
                report.errors.push(e.to_string());
            }
        }
        Ok(())
    }

    /// Unregister rejected tokens. A storage failure here does not undo
    /// deliveries already made, so it is logged rather than returned.
    fn forget(&self, tokens: &[String], mode: Option<Mode>) {
        if let Err(e) = self.registry.unregister_batch(tokens, mode) {
            log::error!("[Dispatch] Failed to unregister rejected tokens: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_to_send_without_transports() {
        let dispatcher = Dispatcher::new(TokenRegistry::in_memory());
        let result = dispatcher.notify(7, &Notification::new(1, "t", "b")).unwrap();
        assert_eq!(result, NOTHING_TO_SEND);
    }

    #[test]
    fn test_missing_transport_is_configuration_error() {
        let registry = TokenRegistry::in_memory();
        registry
            .register(&"ab".repeat(32), 7, Mode::Production)
            .unwrap();
        registry
            .register("broadcast-token", 7, Mode::Production)
            .unwrap();

        let err = Dispatcher::new(registry)
            .notify(7, &Notification::new(1, "t", "b"))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_from_config_without_credentials() {
        let dispatcher = Dispatcher::from_config(&Config::default(), TokenRegistry::in_memory()).unwrap();
        assert!(dispatcher.apple.is_none());
        assert!(dispatcher.broadcast.is_none());
    }

    #[test]
    fn test_missing_setting_follows_transport_kind() {
        let registry = TokenRegistry::in_memory();
        registry
            .register(&"ab".repeat(32), 7, Mode::Production)
            .unwrap();
        let notification = Notification::new(1, "t", "b");

        let binary = Config {
            apns_transport: ApnsTransportKind::Binary,
            ..Config::default()
        };
        let err = Dispatcher::from_config(&binary, registry.clone())
            .unwrap()
            .notify(7, &notification)
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingSetting("apns_certificate_path")));

        let token = Config {
            apns_transport: ApnsTransportKind::Token,
            ..Config::default()
        };
        let err = Dispatcher::from_config(&token, registry)
            .unwrap()
            .notify(7, &notification)
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingSetting("apns_key_path")));
    }
}
