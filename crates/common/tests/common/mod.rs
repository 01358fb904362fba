//! Shared test utilities for transport and storage integration tests
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Multipart, Path};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{json, Value};

pub const CA_DER: &[u8] = include_bytes!("../fixtures/ca.der");
pub const LEAF_DER: &[u8] = include_bytes!("../fixtures/leaf.der");
pub const LEAF_KEY_DER: &[u8] = include_bytes!("../fixtures/leaf.key.der");
/// Self-signed certificate outside the test CA's hierarchy
pub const STRAY_DER: &[u8] = include_bytes!("../fixtures/stray.der");

/// SPKI pin of the `localhost` leaf certificate
pub const LEAF_PIN: &str = "P26FGgvWx6IDV4/EmJMN2pVCOWX9/6+3q5G5BDvQ4IU=";
/// SPKI pin of the test CA
pub const CA_PIN: &str = "aBcMZgo/WeRV4vvrc+n/TuptS26UANM97GrZ820xNOg=";
/// SPKI pin of [`STRAY_DER`]
pub const STRAY_PIN: &str = "0avqgKtRFcEFRN4RcEZ+pIGwTt71F2yzk6UchTErU9s=";

/// Body returned by the TLS server
pub const TLS_BODY: &str = r#"{"pinned":true}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start the plain HTTP echo server, returning its base url
///
/// Routes:
/// - `/echo`: any method, returns method, path, headers and body as JSON
/// - `/status/:code`: responds with `code` and a JSON error body
/// - `/slow`: waits two seconds before answering
/// - `/redirect`: 302 to `/echo`
/// - `/multipart`: parses a multipart body and returns its fields
pub async fn spawn_echo_server() -> String {
    let app = Router::new()
        .route("/echo", any(echo))
        .route("/status/:code", any(status))
        .route("/slow", get(slow))
        .route("/redirect", get(|| async { Redirect::to("/echo") }))
        .route("/multipart", post(multipart));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let headers: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();

    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": "requested failure", "code": code })))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

async fn multipart(mut form: Multipart) -> Json<Value> {
    let mut fields = Vec::new();
    while let Some(field) = form.next_field().await.unwrap() {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let text = field.text().await.unwrap();
        fields.push(json!({
            "name": name,
            "fileName": file_name,
            "contentType": content_type,
            "text": text,
        }));
    }
    Json(json!({ "fields": fields }))
}

/// Start a one-route HTTPS server on a std thread
///
/// Presents the `localhost` leaf plus the test CA, answers every request
/// with [`TLS_BODY`]. Returns the bound address; connect as `localhost`.
pub fn spawn_tls_server() -> SocketAddr {
    spawn_tls_server_with_chain(&[LEAF_DER, CA_DER])
}

/// Like [`spawn_tls_server`], presenting `chain` as sent
///
/// The first certificate must be the `localhost` leaf.
pub fn spawn_tls_server_with_chain(chain: &[&[u8]]) -> SocketAddr {
    let config = Arc::new(tls_server_config(chain));
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let config = config.clone();
            std::thread::spawn(move || {
                let _ = serve_tls_connection(config, stream);
            });
        }
    });

    addr
}

fn tls_server_config(chain: &[&[u8]]) -> rustls::ServerConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let chain = chain
        .iter()
        .map(|der| CertificateDer::from(der.to_vec()))
        .collect();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(LEAF_KEY_DER.to_vec()));

    rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap()
}

fn serve_tls_connection(
    config: Arc<rustls::ServerConfig>,
    tcp: std::net::TcpStream,
) -> std::io::Result<()> {
    tcp.set_read_timeout(Some(Duration::from_secs(5)))?;
    let conn = rustls::ServerConnection::new(config).map_err(std::io::Error::other)?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    // Read until the end of the request head; test requests carry no body
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tls.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        TLS_BODY.len(),
        TLS_BODY
    );
    tls.write_all(response.as_bytes())?;
    tls.flush()?;
    tls.conn.send_close_notify();
    let _ = tls.flush();
    Ok(())
}
