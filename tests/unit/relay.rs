use wa_gateway::config::BackendConfig;
use wa_gateway::relay::{RelayError, WebhookRelay};
use wa_gateway::types::{MessageType, WebhookPayload};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload() -> WebhookPayload {
    WebhookPayload {
        user_id: "user1".to_string(),
        group_name: "Alice".to_string(),
        group_id: "5511999@c.us".to_string(),
        sender: "5511999@c.us".to_string(),
        sender_name: "Alice".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        message_type: MessageType::Text,
        text: Some("hi".to_string()),
        media: None,
        media_mime: None,
        media_filename: None,
        validation_required: true,
    }
}

fn relay_for(uri: &str, timeout_seconds: u64) -> WebhookRelay {
    let backend = BackendConfig {
        url: uri.to_string(),
        request_timeout_seconds: timeout_seconds,
        ..BackendConfig::default()
    };
    WebhookRelay::new(reqwest::Client::new(), &backend)
}

#[tokio::test]
async fn test_deliver_parses_reply_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/whatsapp/webhook"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(serde_json::json!({"user_id": "user1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"status": "processed", "reply_message": "ok!"}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(&server.uri(), 5);
    let resp = relay.deliver(&payload()).await.unwrap();
    assert_eq!(resp.status.as_deref(), Some("processed"));
    assert_eq!(resp.reply_message.as_deref(), Some("ok!"));
}

#[tokio::test]
async fn test_deliver_tolerates_missing_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let relay = relay_for(&server.uri(), 5);
    let resp = relay.deliver(&payload()).await.unwrap();
    assert!(resp.status.is_none());
    assert!(resp.reply_message.is_none());
}

#[tokio::test]
async fn test_deliver_non_success_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("validation failed"))
        .mount(&server)
        .await;

    let relay = relay_for(&server.uri(), 5);
    let err = relay.deliver(&payload()).await.unwrap_err();
    match err {
        RelayError::Backend { status, body } => {
            assert_eq!(status.as_u16(), 422);
            assert_eq!(body, "validation failed");
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_deliver_network_error() {
    // Nothing is listening here.
    let relay = relay_for("http://127.0.0.1:1", 1);
    let err = relay.deliver(&payload()).await.unwrap_err();
    assert!(matches!(err, RelayError::Network(_)));
}

#[tokio::test]
async fn test_deliver_timeout_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "ok"}))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let relay = relay_for(&server.uri(), 1);
    let err = relay.deliver(&payload()).await.unwrap_err();
    assert!(matches!(err, RelayError::Network(_)));
}

#[test]
fn test_url_construction() {
    let backend = BackendConfig {
        url: "https://backend.example.com".to_string(),
        ..BackendConfig::default()
    };
    let relay = WebhookRelay::new(reqwest::Client::new(), &backend);
    assert_eq!(relay.url(), "https://backend.example.com/api/whatsapp/webhook");
}
