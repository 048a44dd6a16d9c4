//! The `notify` command.

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use super::open_registry;
use crate::dispatch::Dispatcher;
use crate::notification::Notification;
use crate::Config;

/// What to send, as given on the command line.
#[derive(Debug, Clone)]
pub struct NotifyArgs {
    /// Recipient.
    pub owner_id: i64,
    /// Host-side notification identifier.
    pub id: u32,
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Badge count.
    pub badge: u32,
    /// Play the default sound.
    pub sound: bool,
    /// JSON object merged into the payload's custom data.
    pub extra: Option<String>,
}

impl NotifyArgs {
    fn notification(&self) -> Result<Notification> {
        let mut notification = Notification::new(self.id, &self.title, &self.body)
            .with_badge(self.badge)
            .with_sound(self.sound);

        if let Some(extra) = &self.extra {
            let extra: Map<String, Value> =
                serde_json::from_str(extra).context("--extra must be a JSON object")?;
            for (key, value) in extra {
                notification = notification.with_extra(key, value);
            }
        }
        Ok(notification)
    }
}

/// Sends one notification to every device of the recipient.
///
/// Prints the delivered count, or `-1` when the recipient has no devices.
/// Connection failures are listed on stderr; configuration problems fail
/// the command.
pub fn run(config: &Config, args: &NotifyArgs) -> Result<()> {
    let notification = args.notification()?;
    let registry = open_registry(config)?;
    let dispatcher =
        Dispatcher::from_config(config, registry).context("Failed to set up transports")?;

    match dispatcher.notify_report(args.owner_id, &notification)? {
        None => println!("-1"),
        Some(report) => {
            for error in &report.errors {
                eprintln!("warning: {}", error);
            }
            println!("{}", report.delivered);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: Option<&str>) -> NotifyArgs {
        NotifyArgs {
            owner_id: 1,
            id: 9,
            title: "Hi".into(),
            body: "There".into(),
            badge: 2,
            sound: false,
            extra: extra.map(String::from),
        }
    }

    #[test]
    fn test_extra_is_merged() {
        let notification = args(Some(r#"{"thread": 12}"#)).notification().unwrap();
        assert_eq!(notification.extra.get("thread"), Some(&Value::from(12)));
        assert!(!notification.sound);
        assert_eq!(notification.badge, 2);
    }

    #[test]
    fn test_extra_must_be_object() {
        assert!(args(Some("[1, 2]")).notification().is_err());
    }
}
