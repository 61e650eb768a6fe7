//! `EmailClient` against a mocked HTTP API.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use raffle_core::notification::{EmailMessage, Notifier, NotifyError};
use raffle_gateway::{EmailClient, EmailConfig};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> EmailClient {
    EmailClient::new(EmailConfig {
        api_url: server.uri(),
        api_key: "re_test".to_string(),
        from: "Raffles <no-reply@raffles.test>".to_string(),
        timeout: Duration::from_secs(2),
    })
    .expect("client")
}

fn message() -> EmailMessage {
    EmailMessage {
        to: "buyer@example.com".to_string(),
        subject: "Your tickets".to_string(),
        html: "<p>Numbers 3, 7</p>".to_string(),
    }
}

/// Test 1: a message is posted with sender and auth.
#[tokio::test]
async fn test_send_email() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer re_test"))
        .and(body_json(json!({
            "from": "Raffles <no-reply@raffles.test>",
            "to": ["buyer@example.com"],
            "subject": "Your tickets",
            "html": "<p>Numbers 3, 7</p>"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "email-1" })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).send(message()).await.expect("sent");
}

/// Test 2: a refused message surfaces the provider's answer.
#[tokio::test]
async fn test_rejected_email() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid recipient"))
        .mount(&server)
        .await;

    let err = client(&server).send(message()).await.expect_err("rejected");

    assert_eq!(
        err,
        NotifyError::Rejected {
            status: 422,
            message: "invalid recipient".to_string()
        }
    );
}
