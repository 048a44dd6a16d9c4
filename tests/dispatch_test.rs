//! Integration tests for the dispatcher, using in-process fake transports.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use push_dispatch::transport::{BatchOutcome, BatchTransport, DeviceTransport, SendOutcome};
use push_dispatch::{
    DeviceToken, DispatchError, Dispatcher, Mode, Notification, TokenRegistry, NOTHING_TO_SEND,
};

const APPLE_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const APPLE_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

/// Device transport that answers from a fixed script and records calls.
#[derive(Clone, Default)]
struct ScriptedDevice {
    calls: Arc<Mutex<Vec<String>>>,
    rejected: Vec<String>,
    failed: Vec<String>,
    pacing: Option<Duration>,
}

impl DeviceTransport for ScriptedDevice {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn send(&self, device: &DeviceToken, _: &Notification) -> push_dispatch::Result<SendOutcome> {
        self.calls.lock().unwrap().push(device.token.clone());
        if self.rejected.contains(&device.token) {
            Ok(SendOutcome::Rejected)
        } else if self.failed.contains(&device.token) {
            Ok(SendOutcome::Failed)
        } else {
            Ok(SendOutcome::Delivered)
        }
    }

    fn pacing(&self) -> Option<Duration> {
        self.pacing
    }
}

#[derive(Clone, Default)]
struct ScriptedBatch {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    rejected: Vec<String>,
    short_key: bool,
}

impl BatchTransport for ScriptedBatch {
    fn preflight(&self) -> push_dispatch::Result<()> {
        if self.short_key {
            return Err(DispatchError::InvalidApiKey);
        }
        Ok(())
    }

    fn send_batch(
        &self,
        tokens: &[String],
        _: &Notification,
    ) -> push_dispatch::Result<BatchOutcome> {
        self.calls.lock().unwrap().push(tokens.to_vec());
        let rejected: Vec<String> = tokens
            .iter()
            .filter(|t| self.rejected.contains(t))
            .cloned()
            .collect();
        Ok(BatchOutcome {
            delivered: tokens.len() - rejected.len(),
            rejected,
        })
    }
}

fn notification() -> Notification {
    Notification::new(11, "Title", "Body")
}

#[test]
fn test_no_tokens_returns_sentinel_without_sending() {
    let device = ScriptedDevice::default();
    let batch = ScriptedBatch::default();
    let dispatcher = Dispatcher::new(TokenRegistry::in_memory())
        .with_apple_transport(device.clone())
        .with_broadcast_transport(batch.clone());

    assert_eq!(dispatcher.notify(5, &notification()).unwrap(), NOTHING_TO_SEND);
    assert!(device.calls.lock().unwrap().is_empty());
    assert!(batch.calls.lock().unwrap().is_empty());
}

#[test]
fn test_tokens_are_routed_by_shape() {
    let registry = TokenRegistry::in_memory();
    registry.register(APPLE_A, 5, Mode::Production).unwrap();
    registry.register("fcm:token-1", 5, Mode::Production).unwrap();
    registry.register("fcm:token-2", 5, Mode::Development).unwrap();
    // 63 hex characters is not a Platform-A token.
    registry.register(&APPLE_B[..63], 5, Mode::Production).unwrap();

    let device = ScriptedDevice::default();
    let batch = ScriptedBatch::default();
    let dispatcher = Dispatcher::new(registry)
        .with_apple_transport(device.clone())
        .with_broadcast_transport(batch.clone());

    assert_eq!(dispatcher.notify(5, &notification()).unwrap(), 4);
    assert_eq!(*device.calls.lock().unwrap(), vec![APPLE_A.to_string()]);

    let batches = batch.calls.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
}

#[test]
fn test_rejected_device_token_is_unregistered() {
    let registry = TokenRegistry::in_memory();
    registry.register(APPLE_A, 5, Mode::Production).unwrap();
    registry.register(APPLE_B, 5, Mode::Development).unwrap();

    let device = ScriptedDevice {
        rejected: vec![APPLE_B.to_string()],
        pacing: Some(Duration::from_millis(1)),
        ..ScriptedDevice::default()
    };
    let dispatcher = Dispatcher::new(registry.clone()).with_apple_transport(device);

    let report = dispatcher.notify_report(5, &notification()).unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.rejected, 1);

    let remaining = registry.tokens_for(5).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].token, APPLE_A);
}

#[test]
fn test_rejected_broadcast_token_is_unregistered() {
    let registry = TokenRegistry::in_memory();
    registry.register("fcm:keep", 5, Mode::Production).unwrap();
    registry.register("fcm:gone", 5, Mode::Production).unwrap();

    let batch = ScriptedBatch {
        rejected: vec!["fcm:gone".to_string()],
        ..ScriptedBatch::default()
    };
    let dispatcher = Dispatcher::new(registry.clone()).with_broadcast_transport(batch);

    assert_eq!(dispatcher.notify(5, &notification()).unwrap(), 1);
    let remaining = registry.tokens_for(5).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].token, "fcm:keep");
}

#[test]
fn test_configuration_error_aborts_before_any_send() {
    let registry = TokenRegistry::in_memory();
    registry.register(APPLE_A, 5, Mode::Production).unwrap();
    registry.register("fcm:token", 5, Mode::Production).unwrap();

    let device = ScriptedDevice::default();
    let batch = ScriptedBatch {
        short_key: true,
        ..ScriptedBatch::default()
    };
    let dispatcher = Dispatcher::new(registry)
        .with_apple_transport(device.clone())
        .with_broadcast_transport(batch.clone());

    let err = dispatcher.notify(5, &notification()).unwrap_err();
    assert!(matches!(err, DispatchError::InvalidApiKey));
    assert!(device.calls.lock().unwrap().is_empty());
    assert!(batch.calls.lock().unwrap().is_empty());
}

#[test]
fn test_gateway_error_is_reported_not_raised() {
    struct Unreachable;

    impl DeviceTransport for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn send(&self, _: &DeviceToken, _: &Notification) -> push_dispatch::Result<SendOutcome> {
            Err(DispatchError::Gateway {
                gateway: "gateway.example:2195".into(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            })
        }
    }

    let registry = TokenRegistry::in_memory();
    registry.register(APPLE_A, 5, Mode::Production).unwrap();
    let dispatcher = Dispatcher::new(registry.clone()).with_apple_transport(Unreachable);

    let report = dispatcher.notify_report(5, &notification()).unwrap().unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors, vec!["Cannot connect to gateway: gateway.example:2195.".to_string()]);
    assert_eq!(registry.count(None).unwrap(), 1);
}

const APPLE_C: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

fn three_apple_devices() -> TokenRegistry {
    let registry = TokenRegistry::in_memory();
    for token in [APPLE_A, APPLE_B, APPLE_C] {
        registry.register(token, 5, Mode::Production).unwrap();
    }
    registry
}

#[test]
fn test_paced_transport_waits_between_sends() {
    let device = ScriptedDevice {
        pacing: Some(Duration::from_millis(50)),
        ..ScriptedDevice::default()
    };
    let dispatcher = Dispatcher::new(three_apple_devices()).with_apple_transport(device.clone());

    let started = Instant::now();
    assert_eq!(dispatcher.notify(5, &notification()).unwrap(), 3);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(device.calls.lock().unwrap().len(), 3);
}

#[test]
fn test_unpaced_transport_does_not_wait() {
    let device = ScriptedDevice::default();
    let dispatcher = Dispatcher::new(three_apple_devices()).with_apple_transport(device.clone());

    let started = Instant::now();
    assert_eq!(dispatcher.notify(5, &notification()).unwrap(), 3);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[test]
fn test_failed_send_keeps_token() {
    let device = ScriptedDevice {
        failed: vec![APPLE_B.to_string()],
        ..ScriptedDevice::default()
    };
    let registry = three_apple_devices();
    let dispatcher = Dispatcher::new(registry.clone()).with_apple_transport(device);

    let report = dispatcher.notify_report(5, &notification()).unwrap().unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.rejected, 0);
    assert_eq!(registry.count(None).unwrap(), 3);
}
