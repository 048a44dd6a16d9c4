//! Feedback-driven token reconciliation.
//!
//! Apple's feedback service streams one record per device token it has
//! stopped delivering to, then closes the connection:
//!
//! ```text
//! ┌──────────────┬────────────┬──────────────────────┐
//! │ timestamp u32│ length u16 │ token (32 bytes)     │   × N, big-endian
//! └──────────────┴────────────┴──────────────────────┘
//! ```
//!
//! The reconciler reads until end-of-stream, decodes every complete record
//! and removes the tokens in one registry call. A connection that drops
//! mid-stream still has its complete records applied.

use std::io::{self, Read};

use chrono::{DateTime, Utc};

use crate::config::ApnsCertificateSettings;
use crate::constants::{
    APNS_FEEDBACK_PORT, APNS_FEEDBACK_PRODUCTION, APNS_FEEDBACK_SANDBOX, FEEDBACK_READ_TIMEOUT,
    FEEDBACK_RECORD_LEN, TLS_CONNECT_TIMEOUT,
};
use crate::error::{DispatchError, Result};
use crate::registry::TokenRegistry;
use crate::token::{self, Mode};
use crate::transport::GatewayTls;

/// One decoded feedback record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// When the service determined the token was dead.
    pub timestamp: DateTime<Utc>,
    /// Canonical lowercase hex token.
    pub token: String,
}

/// Decode every complete record in `bytes`. A trailing partial record is ignored.
pub fn decode_records(bytes: &[u8]) -> Vec<FeedbackRecord> {
    let records: Vec<FeedbackRecord> = bytes
        .chunks_exact(FEEDBACK_RECORD_LEN)
        .map(|record| {
            let seconds = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
            let length = usize::from(u16::from_be_bytes([record[4], record[5]]));
            let token_bytes = &record[6..6 + length.min(32)];
            FeedbackRecord {
                timestamp: DateTime::from_timestamp(i64::from(seconds), 0).unwrap_or_default(),
                token: token::encode_apns(token_bytes),
            }
        })
        .collect();

    let leftover = bytes.len() % FEEDBACK_RECORD_LEN;
    if leftover != 0 {
        log::warn!("[Feedback] Ignoring {} trailing byte(s) of a truncated record", leftover);
    }
    records
}

/// Read `reader` until end-of-stream, keeping whatever arrived before an error.
pub fn read_stream<R: Read>(reader: &mut R) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => bytes.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("[Feedback] Stream ended early after {} bytes: {}", bytes.len(), e);
                break;
            }
        }
    }
    bytes
}

/// Where feedback bytes come from.
pub trait FeedbackSource: Send + Sync {
    /// Drain the feedback stream for `mode` and return its raw bytes.
    fn fetch(&self, mode: Mode) -> Result<Vec<u8>>;
}

/// The certificate-authenticated feedback service.
#[derive(Debug, Clone)]
pub struct TlsFeedbackSource {
    tls: GatewayTls,
}

impl TlsFeedbackSource {
    /// Load the push certificate used for the feedback service.
    pub fn new(settings: &ApnsCertificateSettings) -> Result<Self> {
        Ok(Self::with_tls(GatewayTls::from_settings(settings)?))
    }

    /// Build around an already-loaded certificate.
    pub fn with_tls(tls: GatewayTls) -> Self {
        Self { tls }
    }

    fn host(mode: Mode) -> &'static str {
        if mode.is_production() {
            APNS_FEEDBACK_PRODUCTION
        } else {
            APNS_FEEDBACK_SANDBOX
        }
    }
}

impl FeedbackSource for TlsFeedbackSource {
    fn fetch(&self, mode: Mode) -> Result<Vec<u8>> {
        let host = Self::host(mode);
        let mut stream = self.tls.connect(host, APNS_FEEDBACK_PORT, TLS_CONNECT_TIMEOUT)?;
        stream
            .get_ref()
            .set_read_timeout(Some(FEEDBACK_READ_TIMEOUT))
            .map_err(|e| DispatchError::gateway(format!("{host}:{APNS_FEEDBACK_PORT}"), e))?;
        Ok(read_stream(&mut stream))
    }
}

/// Removes tokens the feedback service reports dead.
pub struct FeedbackReconciler {
    registry: TokenRegistry,
    source: Box<dyn FeedbackSource>,
}

impl std::fmt::Debug for FeedbackReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackReconciler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl FeedbackReconciler {
    /// Reconcile `registry` against `source`.
    pub fn new(registry: TokenRegistry, source: impl FeedbackSource + 'static) -> Self {
        Self {
            registry,
            source: Box::new(source),
        }
    }

    /// Drain the stream for `mode` and unregister every reported token.
    ///
    /// Returns the number of registry rows removed.
    pub fn reconcile(&self, mode: Mode) -> Result<usize> {
        let bytes = self.source.fetch(mode)?;
        let records = decode_records(&bytes);
        log::info!("[Feedback] {} record(s) from {} feedback", records.len(), mode);

        let tokens: Vec<String> = records.into_iter().map(|r| r.token).collect();
        self.registry.unregister_batch(&tokens, Some(mode))
    }
}

/// The periodic maintenance job: stale purge plus feedback reconciliation.
#[derive(Debug)]
pub struct ScheduledMaintenance {
    registry: TokenRegistry,
    reconciler: Option<FeedbackReconciler>,
    feedback_production: bool,
}

impl ScheduledMaintenance {
    /// Without a reconciler only the stale purge runs.
    pub fn new(
        registry: TokenRegistry,
        reconciler: Option<FeedbackReconciler>,
        feedback_production: bool,
    ) -> Self {
        Self {
            registry,
            reconciler,
            feedback_production,
        }
    }

    /// Run every step. Returns `true` when all of them succeeded.
    ///
    /// Steps are independent: a failing one is logged and the rest still run.
    pub fn run(&self) -> bool {
        let mut ok = true;

        if let Err(e) = self.registry.purge_stale() {
            log::error!("[Feedback] Stale purge failed: {}", e);
            ok = false;
        }

        let Some(reconciler) = &self.reconciler else {
            log::info!("[Feedback] No push certificate configured, skipping feedback");
            return ok;
        };

        if self.feedback_production {
            ok &= Self::step(reconciler, Mode::Production);
        }

        match self.registry.count(Some(Mode::Development)) {
            Ok(0) => log::debug!("[Feedback] No development tokens, skipping sandbox feedback"),
            Ok(_) => ok &= Self::step(reconciler, Mode::Development),
            Err(e) => {
                log::error!("[Feedback] Counting development tokens failed: {}", e);
                ok = false;
            }
        }

        ok
    }

    fn step(reconciler: &FeedbackReconciler, mode: Mode) -> bool {
        match reconciler.reconcile(mode) {
            Ok(removed) => {
                log::info!("[Feedback] Removed {} {} token(s)", removed, mode);
                true
            }
            Err(e) => {
                log::error!("[Feedback] {} reconciliation failed: {}", mode, e);
                false
            }
        }
    }
}
