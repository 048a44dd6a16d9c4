//! The scheduled maintenance command (`push-dispatch feedback`).
//!
//! Meant to be run from cron. Exits non-zero when any step failed so the
//! scheduler's job tracking sees it.

use anyhow::{bail, Result};

use super::open_registry;
use crate::feedback::{FeedbackReconciler, ScheduledMaintenance, TlsFeedbackSource};
use crate::registry::TokenRegistry;
use crate::Config;

/// Purges stale tokens and reconciles the feedback streams.
pub fn run(config: &Config) -> Result<()> {
    let registry = open_registry(config)?;

    if !run_steps(config, registry) {
        bail!("Maintenance finished with errors (see log)");
    }

    println!("Maintenance complete");
    Ok(())
}

/// Returns `true` when every step succeeded.
///
/// An unloadable certificate skips feedback but not the stale purge.
fn run_steps(config: &Config, registry: TokenRegistry) -> bool {
    let (reconciler, certificate_ok) = match config.certificate_settings() {
        None => (None, true),
        Some(settings) => match TlsFeedbackSource::new(&settings) {
            Ok(source) => (Some(FeedbackReconciler::new(registry.clone(), source)), true),
            Err(e) => {
                log::error!("[Feedback] Cannot load push certificate, skipping feedback: {}", e);
                (None, false)
            }
        },
    };

    let steps_ok = ScheduledMaintenance::new(registry, reconciler, config.feedback_production).run();
    steps_ok && certificate_ok
}
