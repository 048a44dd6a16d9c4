//! Broadcast transport for Platform-B tokens (FCM legacy HTTP protocol).
//!
//! One POST per notify call carries every Platform-B token:
//!
//! ```text
//! POST <endpoint>
//! Authorization: key=<api key>
//!
//! {"registration_ids": [...], "data": {..extra, "title", "message", "notify"}}
//!
//! 200 {"success": n, "failure": m, "results": [{"message_id": ..} | {"error": ..}, ...]}
//! ```
//!
//! `results` is positionally aligned with `registration_ids`. Entries with
//! `"error": "NotRegistered"` mark tokens to unregister.

use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};

use super::{BatchOutcome, BatchTransport};
use crate::config::BroadcastSettings;
use crate::constants::MIN_API_KEY_LEN;
use crate::error::{DispatchError, Result};
use crate::notification::Notification;
use crate::token;

/// Result error marking a token the service no longer knows.
const NOT_REGISTERED: &str = "NotRegistered";

/// Broadcast transport.
#[derive(Debug)]
pub struct BroadcastTransport {
    client: Client,
    settings: BroadcastSettings,
}

impl BroadcastTransport {
    /// Build the transport. The API key is validated on every send.
    pub fn new(settings: BroadcastSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DispatchError::gateway(&settings.endpoint, std::io::Error::other(e.to_string())))?;
        Ok(Self { client, settings })
    }

    fn check_api_key(&self) -> Result<()> {
        if self.settings.api_key.len() < MIN_API_KEY_LEN {
            return Err(DispatchError::InvalidApiKey);
        }
        Ok(())
    }
}

impl BatchTransport for BroadcastTransport {
    fn preflight(&self) -> Result<()> {
        self.check_api_key()
    }

    fn send_batch(&self, tokens: &[String], notification: &Notification) -> Result<BatchOutcome> {
        self.check_api_key()?;
        if tokens.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let body = json!({
            "registration_ids": tokens,
            "data": notification.broadcast_data(),
        });

        let response = self
            .client
            .post(&self.settings.endpoint)
            .header(AUTHORIZATION, format!("key={}", self.settings.api_key))
            .json(&body)
            .send();

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                return Err(DispatchError::gateway(
                    &self.settings.endpoint,
                    std::io::Error::other(e.to_string()),
                ));
            }
            Err(e) => {
                log::warn!("[Broadcast] Request failed: {}", e);
                return Ok(BatchOutcome::default());
            }
        };

        let status = response.status();
        let text = response.text().unwrap_or_default();
        if !status.is_success() {
            log::warn!("[Broadcast] Send failed (HTTP {}): {}", status.as_u16(), text);
            return Ok(BatchOutcome::default());
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) if value.is_object() => Ok(parse_response(&value, tokens)),
            _ => {
                log::warn!("[Broadcast] Unexpected response body: {}", text);
                Ok(BatchOutcome::default())
            }
        }
    }
}

/// Interpret a response object against the tokens that were sent.
///
/// A `results` array of the wrong length is clamped to the shorter of the
/// two, and the success count never exceeds the number of tokens.
pub fn parse_response(response: &Value, tokens: &[String]) -> BatchOutcome {
    let reported = response
        .get("success")
        .and_then(Value::as_u64)
        .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX));
    let delivered = reported.min(tokens.len());

    let results = response
        .get("results")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    if results.len() != tokens.len() {
        log::warn!(
            "[Broadcast] Response has {} results for {} tokens",
            results.len(),
            tokens.len()
        );
    }

    let mut rejected = Vec::new();
    for (token, result) in tokens.iter().zip(results) {
        match result.get("error").and_then(Value::as_str) {
            Some(NOT_REGISTERED) => rejected.push(token.clone()),
            Some(error) => {
                log::info!("[Broadcast] Token {} failed: {}", token::short(token), error);
            }
            None => {
                if let Some(canonical) = result.get("registration_id").and_then(Value::as_str) {
                    log::info!(
                        "[Broadcast] Token {} has canonical id {}",
                        token::short(token),
                        token::short(canonical)
                    );
                }
            }
        }
    }

    BatchOutcome {
        delivered,
        rejected,
    }
}
