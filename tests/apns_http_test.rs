//! HTTP/2 provider API transport against a mock HTTP server.

use std::path::PathBuf;
use std::time::Duration;

use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use push_dispatch::config::ApnsTokenSettings;
use push_dispatch::transport::{ApnsHttpTransport, ProviderTokenSigner};
use push_dispatch::{Dispatcher, Mode, Notification, TokenRegistry};
use serde_json::json;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GOOD: &str = "1111111111111111111111111111111111111111111111111111111111111111";
const BAD: &str = "2222222222222222222222222222222222222222222222222222222222222222";

fn transport(server: &MockServer) -> ApnsHttpTransport {
    let settings = ApnsTokenSettings {
        key_path: PathBuf::from("unused.p8"),
        key_id: "ABC123DEFG".into(),
        team_id: "DEF123GHIJ".into(),
        bundle_id: "com.example.app".into(),
        production_url: server.uri(),
        sandbox_url: server.uri(),
        timeout: Duration::from_secs(5),
    };
    let signer = ProviderTokenSigner::new(SigningKey::random(&mut OsRng), "ABC123DEFG", "DEF123GHIJ");
    ApnsHttpTransport::with_signer(settings, signer).unwrap()
}

fn mount_responses(rt: &Runtime, server: &MockServer) {
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(format!("/3/device/{GOOD}")))
            .and(header("apns-topic", "com.example.app"))
            .and(header("apns-push-type", "alert"))
            .and(header_exists("authorization"))
            .and(header_exists("apns-expiration"))
            .and(body_partial_json(json!({
                "aps": { "alert": { "title": "Title", "body": "Body" }, "badge": 4 }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(server),
    );
    rt.block_on(
        Mock::given(method("POST"))
            .and(path(format!("/3/device/{BAD}")))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "reason": "BadDeviceToken" })),
            )
            .expect(1)
            .mount(server),
    );
}

#[test]
fn test_status_200_delivers_and_400_unregisters() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    mount_responses(&rt, &server);

    let registry = TokenRegistry::in_memory();
    registry.register(GOOD, 3, Mode::Production).unwrap();
    registry.register(BAD, 3, Mode::Development).unwrap();
    let dispatcher = Dispatcher::new(registry.clone()).with_apple_transport(transport(&server));

    let notification = Notification::new(77, "Title", "Body").with_badge(4);
    let report = dispatcher.notify_report(3, &notification).unwrap().unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.rejected, 1);
    let remaining = registry.tokens_for(3).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].token, GOOD);

    rt.block_on(server.verify());
}

#[test]
fn test_bearer_token_is_a_jwt() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server),
    );

    let registry = TokenRegistry::in_memory();
    registry.register(GOOD, 3, Mode::Production).unwrap();
    let dispatcher = Dispatcher::new(registry).with_apple_transport(transport(&server));
    assert_eq!(dispatcher.notify(3, &Notification::new(1, "t", "b")).unwrap(), 1);

    let requests = rt.block_on(server.received_requests()).unwrap();
    assert_eq!(requests.len(), 1);
    let authorization = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    let jwt = authorization.strip_prefix("bearer ").unwrap();
    assert_eq!(jwt.split('.').count(), 3);
}

#[test]
fn test_server_error_keeps_token() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({ "reason": "ServiceUnavailable" })),
            )
            .mount(&server),
    );

    let registry = TokenRegistry::in_memory();
    registry.register(GOOD, 3, Mode::Production).unwrap();
    let dispatcher = Dispatcher::new(registry.clone()).with_apple_transport(transport(&server));

    assert_eq!(dispatcher.notify(3, &Notification::new(1, "t", "b")).unwrap(), 0);
    assert_eq!(registry.count(None).unwrap(), 1);
}
