//! push-dispatch - push notification dispatch engine.
//!
//! Delivers notifications to the devices a host application's users have
//! registered, over whichever wire protocol each device needs, and keeps
//! the token registry free of devices the push services have retired.
//!
//! # Architecture
//!
//! - **Registry** - Canonical device tokens keyed by token, behind a [`TokenStore`]
//! - **Transports** - Binary gateway, HTTP/2 provider API, batch broadcast
//! - **Dispatcher** - Classifies a recipient's tokens and routes them
//! - **Feedback** - Drains dead-token records and runs scheduled maintenance
//!
//! # Modules
//!
//! - [`token`] - Token normalization and platform classification
//! - [`registry`] - Token persistence
//! - [`transport`] - Wire protocols
//! - [`dispatch`] - The `notify` operation
//! - [`feedback`] - Feedback reconciliation and maintenance
//! - [`config`] - Configuration loading

pub mod commands;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod feedback;
pub mod notification;
pub mod registry;
pub mod token;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DispatchReport, Dispatcher, NOTHING_TO_SEND};
pub use error::{DispatchError, Result};
pub use feedback::{FeedbackReconciler, FeedbackSource, ScheduledMaintenance};
pub use notification::Notification;
pub use registry::{TokenRegistry, TokenStore};
pub use token::{DeviceToken, Mode, Platform};
