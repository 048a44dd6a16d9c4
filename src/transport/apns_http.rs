//! APNs provider API transport (HTTP/2, token authentication).
//!
//! One POST per device to `/3/device/<token>` on the production or sandbox
//! host, authenticated with a bearer provider token.
//!
//! # Status handling
//!
//! | Status | Meaning                         | Outcome    |
//! |--------|---------------------------------|------------|
//! | 200    | accepted                        | Delivered  |
//! | 400    | bad or expired device token     | Rejected   |
//! | 410    | device no longer active         | Rejected   |
//! | 403    | provider token rejected         | Failed (token re-minted on next send) |
//! | other  | throttled, server error, ...    | Failed     |

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{DeviceTransport, ProviderTokenSigner, SendOutcome};
use crate::config::ApnsTokenSettings;
use crate::constants::NOTIFICATION_EXPIRY_SECS;
use crate::error::{DispatchError, Result};
use crate::notification::Notification;
use crate::token::{self, DeviceToken, Mode};

/// Error body returned with non-200 responses.
#[derive(Debug, Deserialize)]
struct ApnsErrorBody {
    reason: String,
}

/// HTTP/2 provider API transport.
#[derive(Debug)]
pub struct ApnsHttpTransport {
    client: Client,
    signer: ProviderTokenSigner,
    settings: ApnsTokenSettings,
}

impl ApnsHttpTransport {
    /// Load the signing key and build an HTTP/2-capable client.
    ///
    /// Fails before any network attempt when the key cannot be loaded or
    /// the HTTP stack cannot be configured for HTTP/2.
    pub fn new(settings: ApnsTokenSettings) -> Result<Self> {
        let signer = ProviderTokenSigner::from_pem_file(
            &settings.key_path,
            settings.key_id.clone(),
            settings.team_id.clone(),
        )?;
        Self::with_signer(settings, signer)
    }

    /// Build the transport around an existing signer.
    pub fn with_signer(settings: ApnsTokenSettings, signer: ProviderTokenSigner) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .http2_adaptive_window(true)
            .build()
            .map_err(|e| DispatchError::Http2Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            signer,
            settings,
        })
    }

    fn device_url(&self, device: &DeviceToken) -> String {
        let base = match device.mode {
            Mode::Production => &self.settings.production_url,
            Mode::Development => &self.settings.sandbox_url,
        };
        format!("{}/3/device/{}", base.trim_end_matches('/'), device.token)
    }
}

impl DeviceTransport for ApnsHttpTransport {
    fn name(&self) -> &'static str {
        "apns-http"
    }

    fn send(&self, device: &DeviceToken, notification: &Notification) -> Result<SendOutcome> {
        let url = self.device_url(device);
        let expiration = Utc::now().timestamp() + NOTIFICATION_EXPIRY_SECS;

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("bearer {}", self.signer.current()))
            .header("apns-topic", &self.settings.bundle_id)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .header("apns-expiration", expiration.to_string())
            .json(&notification.apns_payload())
            .send();

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                return Err(DispatchError::gateway(url, std::io::Error::other(e.to_string())));
            }
            Err(e) => {
                log::warn!("[ApnsHttp] Request for {} failed: {}", token::short(&device.token), e);
                return Ok(SendOutcome::Failed);
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            log::debug!("[ApnsHttp] Delivered {} to {}", notification.id, token::short(&device.token));
            return Ok(SendOutcome::Delivered);
        }

        let reason = response
            .json::<ApnsErrorBody>()
            .map(|body| body.reason)
            .unwrap_or_else(|_| "unknown".to_string());

        let outcome = match status {
            StatusCode::BAD_REQUEST | StatusCode::GONE => {
                log::info!(
                    "[ApnsHttp] Token {} rejected ({} {})",
                    token::short(&device.token),
                    status.as_u16(),
                    reason
                );
                SendOutcome::Rejected
            }
            StatusCode::FORBIDDEN => {
                log::warn!("[ApnsHttp] Provider token refused: {}", reason);
                self.signer.invalidate();
                SendOutcome::Failed
            }
            _ => {
                log::warn!(
                    "[ApnsHttp] Send to {} failed (HTTP {}): {}",
                    token::short(&device.token),
                    status.as_u16(),
                    reason
                );
                SendOutcome::Failed
            }
        };
        Ok(outcome)
    }
}
