//! Webhook transport tests

use beacon::LivenessState;
use beacon::config::Webhook;
use beacon::notifications::{Notification, NotificationError, Notifier, webhook::WebhookNotifier};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn notifier(server: &MockServer) -> WebhookNotifier {
    WebhookNotifier::new(&Webhook {
        url: format!("{}/hooks/beacon", server.uri()),
    })
}

#[tokio::test]
async fn test_posts_notification_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/beacon"))
        .and(body_partial_json(serde_json::json!({
            "recipient": "owner@example.com",
            "kind": "manual_probe",
            "params": { "address": "10.0.0.1", "state": "online" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notification = Notification::ManualProbe {
        address: "10.0.0.1".to_string(),
        state: LivenessState::Online,
        diagnostic: "64 bytes from 10.0.0.1".to_string(),
    };

    notifier(&server)
        .notify("owner@example.com", &notification)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_delivery_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let notification = Notification::WentOffline {
        address: "10.0.0.1".to_string(),
        diagnostic: "100% packet loss".to_string(),
    };

    let err = notifier(&server)
        .notify("owner@example.com", &notification)
        .await
        .unwrap_err();

    assert!(matches!(err, NotificationError::Delivery(msg) if msg.contains("503")));
}
