//! Configuration loading.
//!
//! Reads `config.json` from the push-dispatch config directory and applies
//! `PUSH_DISPATCH_*` environment overrides. Every credential is optional:
//! a missing key is absent, never an empty string or zero.
//!
//! Transports never see [`Config`] directly. It is resolved once into the
//! per-transport settings structs below, which are immutable afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use crate::constants;
use crate::error::DispatchError;

/// Which Platform-A transport to use.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApnsTransportKind {
    /// HTTP/2 provider API authenticated with a signed JWT.
    #[default]
    Token,
    /// Binary frames over a certificate-authenticated TLS socket.
    Binary,
}

impl std::str::FromStr for ApnsTransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" | "jwt" | "http2" => Ok(Self::Token),
            "binary" | "legacy" | "certificate" => Ok(Self::Binary),
            other => Err(format!("unknown APNs transport '{other}'")),
        }
    }
}

/// Configuration for push-dispatch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// PEM file holding the client certificate and its private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_certificate_path: Option<PathBuf>,
    /// Passphrase of the certificate's private key. Never written to disk.
    #[serde(skip_serializing)]
    pub apns_certificate_passphrase: Option<String>,
    /// `.p8` provider signing key (PKCS#8 PEM, P-256).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_key_path: Option<PathBuf>,
    /// Key identifier issued with the signing key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_key_id: Option<String>,
    /// Developer team identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_team_id: Option<String>,
    /// App bundle identifier, sent as the `apns-topic`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_bundle_id: Option<String>,
    /// Which Platform-A transport delivers notifications.
    pub apns_transport: ApnsTransportKind,
    /// Broadcast service API key. Never written to disk.
    #[serde(skip_serializing)]
    pub broadcast_api_key: Option<String>,
    /// Broadcast service endpoint.
    pub broadcast_endpoint: String,
    /// Pause after each binary-gateway send, in milliseconds.
    pub legacy_pacing_ms: u64,
    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Location of the token file. Defaults to `tokens.json` in the config dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_store_path: Option<PathBuf>,
    /// Whether scheduled maintenance drains the production feedback stream.
    pub feedback_production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apns_certificate_path: None,
            apns_certificate_passphrase: None,
            apns_key_path: None,
            apns_key_id: None,
            apns_team_id: None,
            apns_bundle_id: None,
            apns_transport: ApnsTransportKind::default(),
            broadcast_api_key: None,
            broadcast_endpoint: constants::BROADCAST_ENDPOINT.to_string(),
            legacy_pacing_ms: constants::DEFAULT_LEGACY_PACING_MS,
            http_timeout_secs: constants::DEFAULT_HTTP_TIMEOUT_SECS,
            token_store_path: None,
            feedback_production: true,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `PUSH_DISPATCH_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(custom) = env::var("PUSH_DISPATCH_CONFIG_DIR") {
            PathBuf::from(custom)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("push-dispatch")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a specific file, without env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        override_path(&mut self.apns_certificate_path, "PUSH_DISPATCH_APNS_CERTIFICATE");
        override_string(&mut self.apns_certificate_passphrase, "PUSH_DISPATCH_APNS_PASSPHRASE");
        override_path(&mut self.apns_key_path, "PUSH_DISPATCH_APNS_KEY_PATH");
        override_string(&mut self.apns_key_id, "PUSH_DISPATCH_APNS_KEY_ID");
        override_string(&mut self.apns_team_id, "PUSH_DISPATCH_APNS_TEAM_ID");
        override_string(&mut self.apns_bundle_id, "PUSH_DISPATCH_APNS_BUNDLE_ID");
        override_string(&mut self.broadcast_api_key, "PUSH_DISPATCH_BROADCAST_API_KEY");
        override_path(&mut self.token_store_path, "PUSH_DISPATCH_TOKEN_STORE");

        if let Ok(endpoint) = env::var("PUSH_DISPATCH_BROADCAST_ENDPOINT") {
            self.broadcast_endpoint = endpoint;
        }

        if let Ok(kind) = env::var("PUSH_DISPATCH_APNS_TRANSPORT") {
            match kind.parse() {
                Ok(kind) => self.apns_transport = kind,
                Err(e) => log::warn!("Ignoring PUSH_DISPATCH_APNS_TRANSPORT: {e}"),
            }
        }

        if let Ok(pacing) = env::var("PUSH_DISPATCH_LEGACY_PACING_MS") {
            if let Ok(ms) = pacing.parse::<u64>() {
                self.legacy_pacing_ms = ms;
            }
        }

        if let Ok(timeout) = env::var("PUSH_DISPATCH_HTTP_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.http_timeout_secs = secs;
            }
        }

        if let Ok(flag) = env::var("PUSH_DISPATCH_FEEDBACK_PRODUCTION") {
            self.feedback_production = !matches!(flag.as_str(), "0" | "false" | "no");
        }
    }

    /// Where the file token store lives.
    pub fn token_store_path(&self) -> Result<PathBuf> {
        match &self.token_store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("tokens.json")),
        }
    }

    /// HTTP request timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Certificate settings, or `None` when no certificate is configured.
    pub fn certificate_settings(&self) -> Option<ApnsCertificateSettings> {
        self.apns_certificate_path
            .as_ref()
            .map(|path| ApnsCertificateSettings {
                certificate_path: path.clone(),
                passphrase: self.apns_certificate_passphrase.clone(),
                pacing: Duration::from_millis(self.legacy_pacing_ms),
            })
    }

    /// Provider-token settings, or `None` when no signing key is configured.
    ///
    /// A key path without its key id, team id or bundle id is a
    /// configuration error.
    pub fn token_settings(&self) -> std::result::Result<Option<ApnsTokenSettings>, DispatchError> {
        let Some(key_path) = &self.apns_key_path else {
            return Ok(None);
        };
        Ok(Some(ApnsTokenSettings {
            key_path: key_path.clone(),
            key_id: required(&self.apns_key_id, "apns_key_id")?,
            team_id: required(&self.apns_team_id, "apns_team_id")?,
            bundle_id: required(&self.apns_bundle_id, "apns_bundle_id")?,
            production_url: constants::APNS_API_PRODUCTION.to_string(),
            sandbox_url: constants::APNS_API_SANDBOX.to_string(),
            timeout: self.http_timeout(),
        }))
    }

    /// Broadcast settings, or `None` when no API key is configured.
    pub fn broadcast_settings(&self) -> Option<BroadcastSettings> {
        self.broadcast_api_key.as_ref().map(|api_key| BroadcastSettings {
            api_key: api_key.clone(),
            endpoint: self.broadcast_endpoint.clone(),
            timeout: self.http_timeout(),
        })
    }
}

/// Credentials for the binary gateway and the feedback service.
#[derive(Clone)]
pub struct ApnsCertificateSettings {
    /// PEM holding certificate and private key.
    pub certificate_path: PathBuf,
    /// Private key passphrase, if the key is encrypted.
    pub passphrase: Option<String>,
    /// Pause after each send.
    pub pacing: Duration,
}

impl std::fmt::Debug for ApnsCertificateSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnsCertificateSettings")
            .field("certificate_path", &self.certificate_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("pacing", &self.pacing)
            .finish()
    }
}

/// Credentials and endpoints for the HTTP/2 provider API.
#[derive(Debug, Clone)]
pub struct ApnsTokenSettings {
    /// `.p8` signing key.
    pub key_path: PathBuf,
    /// JWT `kid` header.
    pub key_id: String,
    /// JWT `iss` claim.
    pub team_id: String,
    /// `apns-topic` header.
    pub bundle_id: String,
    /// Base URL for production tokens.
    pub production_url: String,
    /// Base URL for development tokens.
    pub sandbox_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

/// Credentials and endpoint for the broadcast protocol.
#[derive(Clone)]
pub struct BroadcastSettings {
    /// Server API key.
    pub api_key: String,
    /// Send endpoint URL.
    pub endpoint: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for BroadcastSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastSettings")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn required(value: &Option<String>, name: &'static str) -> std::result::Result<String, DispatchError> {
    value
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or(DispatchError::MissingSetting(name))
}

fn override_string(slot: &mut Option<String>, var: &str) {
    if let Ok(value) = env::var(var) {
        *slot = if value.is_empty() { None } else { Some(value) };
    }
}

fn override_path(slot: &mut Option<PathBuf>, var: &str) {
    if let Ok(value) = env::var(var) {
        *slot = if value.is_empty() { None } else { Some(PathBuf::from(value)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broadcast_endpoint, constants::BROADCAST_ENDPOINT);
        assert_eq!(config.legacy_pacing_ms, 500);
        assert_eq!(config.apns_transport, ApnsTransportKind::Token);
        assert!(config.feedback_production);
        assert!(config.certificate_settings().is_none());
        assert!(config.broadcast_settings().is_none());
        assert!(config.token_settings().unwrap().is_none());
    }

    #[test]
    fn test_missing_keys_are_absent() {
        let config: Config = serde_json::from_str(r#"{"apns_transport": "binary"}"#).unwrap();
        assert_eq!(config.apns_transport, ApnsTransportKind::Binary);
        assert_eq!(config.apns_key_id, None);
        assert_eq!(config.broadcast_api_key, None);
    }

    #[test]
    fn test_token_settings_require_identifiers() {
        let config = Config {
            apns_key_path: Some(PathBuf::from("/keys/AuthKey.p8")),
            apns_key_id: Some("ABC123DEFG".into()),
            apns_team_id: Some("DEF123GHIJ".into()),
            ..Config::default()
        };
        let err = config.token_settings().unwrap_err();
        assert!(matches!(err, DispatchError::MissingSetting("apns_bundle_id")));

        let complete = Config {
            apns_bundle_id: Some("com.example.app".into()),
            ..config
        };
        let settings = complete.token_settings().unwrap().unwrap();
        assert_eq!(settings.team_id, "DEF123GHIJ");
        assert_eq!(settings.production_url, constants::APNS_API_PRODUCTION);
    }

    #[test]
    fn test_serialization_excludes_secrets() {
        let config = Config {
            apns_certificate_passphrase: Some("hunter2".into()),
            broadcast_api_key: Some("AIzaSySecretKey".into()),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("AIzaSySecretKey"));
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("jwt".parse::<ApnsTransportKind>(), Ok(ApnsTransportKind::Token));
        assert_eq!("legacy".parse::<ApnsTransportKind>(), Ok(ApnsTransportKind::Binary));
        assert!("smtp".parse::<ApnsTransportKind>().is_err());
    }
}
