//! Integration tests for the transport against a plain HTTP echo server

mod common;

use std::time::Duration;

use ::common::crypto::{verify, Session, SIGNATURE_HEADER};
use ::common::transport::{
    FetchError, FetchResponse, FilePart, FormData, RequestOptions, Transport, JSON_CONTENT_TYPE,
};
use serde_json::{json, Value};

async fn fetch(
    url: String,
    options: RequestOptions,
    key: Vec<u8>,
) -> Result<FetchResponse, FetchError> {
    tokio::task::spawn_blocking(move || Transport::new().fetch(&url, &options, &key))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_echo() {
    common::init_tracing();
    let base = common::spawn_echo_server().await;

    let response = fetch(format!("{base}/echo"), RequestOptions::new(), vec![])
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.url, format!("{base}/echo"));
    assert!(response.duration.to_string().ends_with("ms"));

    let echoed = response.json();
    assert_eq!(echoed["method"], "GET");
    assert!(echoed["headers"].get("x-jws-signature").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_post_text_body_and_headers() {
    let base = common::spawn_echo_server().await;

    let options: RequestOptions = serde_json::from_value(json!({
        "method": "post",
        "headers": {
            "Accept": "application/json",
            "tracing": { "X-Trace-Id": "abc123" }
        },
        "body": "{\"amount\":42}"
    }))
    .unwrap();

    let echoed = fetch(format!("{base}/echo"), options, vec![])
        .await
        .unwrap()
        .json();

    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["body"], "{\"amount\":42}");
    assert_eq!(echoed["headers"]["accept"], "application/json");
    assert_eq!(echoed["headers"]["x-trace-id"], "abc123");
    assert_eq!(echoed["headers"]["content-type"], JSON_CONTENT_TYPE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_map_body_sent_as_json_text() {
    let base = common::spawn_echo_server().await;

    let options: RequestOptions = serde_json::from_value(json!({
        "method": "PUT",
        "body": { "name": "tether", "count": 2 }
    }))
    .unwrap();

    let echoed = fetch(format!("{base}/echo"), options, vec![])
        .await
        .unwrap()
        .json();

    let sent: Value = serde_json::from_str(echoed["body"].as_str().unwrap()).unwrap();
    assert_eq!(sent, json!({ "name": "tether", "count": 2 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_signed_request_verifies_on_server() {
    let base = common::spawn_echo_server().await;

    let mut client = Session::generate().unwrap();
    let mut server = Session::generate().unwrap();
    client
        .derive_shared_secret(&server.export_public_key())
        .unwrap();
    server
        .derive_shared_secret(&client.export_public_key())
        .unwrap();

    let body = r#"{"transfer":{"to":"acct-7","amount":42}}"#;
    let options = RequestOptions::new()
        .method("POST")
        .text_body(body)
        .signed("kid-1", "req-42");

    let echoed = fetch(
        format!("{base}/echo"),
        options,
        client.signing_key().to_vec(),
    )
    .await
    .unwrap()
    .json();

    let token = echoed["headers"]["x-jws-signature"].as_str().unwrap();
    let received = echoed["body"].as_str().unwrap();

    let header = verify(token, received.as_bytes(), server.signing_key()).unwrap();
    assert_eq!(header.kid, "kid-1");
    assert_eq!(header.request_id, "req-42");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsigned_before_agreement_still_dispatches() {
    let base = common::spawn_echo_server().await;
    let session = Session::generate().unwrap();

    let options = RequestOptions::new().signed("kid-1", "req-1");
    let echoed = fetch(
        format!("{base}/echo"),
        options,
        session.signing_key().to_vec(),
    )
    .await
    .unwrap()
    .json();

    assert_eq!(echoed["headers"]["x-jws-signature"], "");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_status_is_failure() {
    let base = common::spawn_echo_server().await;

    let err = fetch(format!("{base}/status/404"), RequestOptions::new(), vec![])
        .await
        .unwrap_err();

    let failure = err.failure().unwrap();
    assert!(matches!(err, FetchError::Status(_)));
    assert_eq!(failure.status, Some(404));
    assert_eq!(failure.url.as_deref(), Some(format!("{base}/status/404").as_str()));
    assert!(failure.duration.is_some());
    assert_eq!(failure.json()["error"], "requested failure");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_error_is_failure() {
    let base = common::spawn_echo_server().await;

    let err = fetch(format!("{base}/status/503"), RequestOptions::new(), vec![])
        .await
        .unwrap_err();
    assert_eq!(err.failure().unwrap().status, Some(503));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redirect_reports_final_url() {
    let base = common::spawn_echo_server().await;

    let response = fetch(format!("{base}/redirect"), RequestOptions::new(), vec![])
        .await
        .unwrap();

    assert_eq!(response.url, format!("{base}/echo"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_is_transport_error() {
    let base = common::spawn_echo_server().await;

    let options = RequestOptions::new().timeout(Duration::from_millis(200));
    let err = fetch(format!("{base}/slow"), options, vec![])
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert!(err.is_timeout());
    let failure = err.failure().unwrap();
    assert_eq!(failure.status, None);
    assert_eq!(failure.error, "{}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_response_within_timeout() {
    let base = common::spawn_echo_server().await;

    let options = RequestOptions::new().timeout(Duration::from_secs(5));
    let response = fetch(format!("{base}/slow"), options, vec![])
        .await
        .unwrap();
    assert_eq!(response.response, "late");

    let response = fetch(format!("{base}/slow"), RequestOptions::new(), vec![])
        .await
        .unwrap();
    assert_eq!(response.response, "late");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_refused_is_transport_error() {
    // Bind and drop to get a port nothing listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let err = fetch(
        format!("http://127.0.0.1:{port}/echo"),
        RequestOptions::new(),
        vec![],
    )
    .await
    .unwrap_err();

    assert!(err.is_transport());
    assert_eq!(err.failure().unwrap().json(), json!({}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_put_without_body_never_dispatches() {
    let base = common::spawn_echo_server().await;

    let err = fetch(
        format!("{base}/echo"),
        RequestOptions::new().method("PUT"),
        vec![],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FetchError::MissingBody(_)));
    assert!(err.failure().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multipart_upload_is_parsed_by_server() {
    let base = common::spawn_echo_server().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("receipt.txt");
    std::fs::write(&path, "total: 42").unwrap();

    let form = FormData::new().text("caption", "march").file(
        "upload",
        FilePart::new(format!("file://{}", path.display())).mime("text/plain"),
    );
    let options = RequestOptions::new().method("POST").form(form);

    let echoed = fetch(format!("{base}/multipart"), options, vec![])
        .await
        .unwrap()
        .json();

    assert_eq!(
        echoed["fields"],
        json!([
            { "name": "caption", "fileName": null, "contentType": null, "text": "march" },
            {
                "name": "upload",
                "fileName": "receipt.txt",
                "contentType": "text/plain",
                "text": "total: 42"
            }
        ])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_signed_multipart_covers_exact_bytes() {
    let base = common::spawn_echo_server().await;
    let key = vec![9u8; 32];

    let form = FormData::new().text("a", "1").text("b", "2");
    let options = RequestOptions::new()
        .method("POST")
        .form(form)
        .signed("kid-1", "req-1");

    let echoed = fetch(format!("{base}/echo"), options, key.clone())
        .await
        .unwrap()
        .json();

    let content_type = echoed["headers"]["content-type"].as_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));

    let token = echoed["headers"][SIGNATURE_HEADER.to_ascii_lowercase()]
        .as_str()
        .unwrap();
    let body = echoed["body"].as_str().unwrap();
    assert!(verify(token, body.as_bytes(), &key).is_ok());
}
