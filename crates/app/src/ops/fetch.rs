use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use common::crypto::{KeyAgreementError, SharedSecret};
use common::transport::{pin_hostname, FetchError, FilePart, FormData, RequestOptions, Transport};

use crate::state::AppConfig;

/// Send one request through the pinned transport
#[derive(Args, Debug, Clone)]
pub struct Fetch {
    /// Target URL
    pub url: String,

    /// HTTP method (default GET)
    #[arg(long, short = 'X')]
    pub method: Option<String>,

    /// Request header as name=value, repeatable
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Raw request body, sent as JSON text
    #[arg(long, conflicts_with_all = ["form", "file"])]
    pub body: Option<String>,

    /// Multipart text field as name=value, repeatable
    #[arg(long)]
    pub form: Vec<String>,

    /// Multipart file field as name=path[;type=mime], repeatable
    #[arg(long)]
    pub file: Vec<String>,

    /// SHA-256 SPKI pin for the target host, repeatable (overrides config pins)
    #[arg(long = "pin")]
    pub pins: Vec<String>,

    /// Extra trusted root certificate (DER file)
    #[arg(long)]
    pub root_cert: Option<PathBuf>,

    /// Timeout in milliseconds (defaults to the configured timeout)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Shared secret (base64) used to sign the body
    #[arg(long, requires = "key_id")]
    pub key: Option<String>,

    /// Key id for the signature header
    #[arg(long)]
    pub key_id: Option<String>,

    /// Request id for the signature header (defaults to a fresh UUID)
    #[arg(long, requires = "key_id")]
    pub request_id: Option<String>,

    /// Log the request as curl
    #[arg(long)]
    pub log: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchOpError {
    #[error("expected name=value, got '{0}'")]
    InvalidPair(String),
    #[error("invalid key: {0}")]
    Key(#[from] KeyAgreementError),
    #[error("failed to read root certificate: {0}")]
    RootCert(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Fetch(#[from] FetchError),
    /// The request went out but did not succeed; carries the failure result as JSON
    #[error("{0}")]
    Failed(String),
    #[error("failed to render result: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fetch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Fetch {
    /// Build request options, filling gaps from the config
    fn options(&self, config: &AppConfig) -> Result<RequestOptions, FetchOpError> {
        let mut options = RequestOptions::new()
            .timeout(
                self.timeout
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| config.transport.timeout()),
            )
            .logger(self.log || config.transport.logger_enabled);

        if let Some(method) = &self.method {
            options = options.method(method);
        }

        for header in &self.headers {
            let (name, value) = split_pair(header)?;
            options = options.header(name, value);
        }

        if let Some(body) = &self.body {
            options = options.text_body(body);
        } else if !self.form.is_empty() || !self.file.is_empty() {
            let mut form = FormData::new();
            for field in &self.form {
                let (name, value) = split_pair(field)?;
                form = form.text(name, value);
            }
            for field in &self.file {
                let (name, file) = parse_file_field(field)?;
                form = form.file(name, file);
            }
            options = options.form(form);
        }

        let pins = if self.pins.is_empty() {
            config
                .pins
                .get(&pin_hostname(&self.url))
                .cloned()
                .unwrap_or_default()
        } else {
            self.pins.clone()
        };
        for pin in pins {
            options = options.pin(pin);
        }

        if let Some(key_id) = &self.key_id {
            let request_id = self
                .request_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            options = options.signed(key_id, request_id);
        }

        Ok(options)
    }

    fn signing_key(&self) -> Result<Vec<u8>, FetchOpError> {
        match &self.key {
            Some(key) => Ok(SharedSecret::from_base64(key)?.as_bytes().to_vec()),
            None => Ok(Vec::new()),
        }
    }

    fn transport(&self) -> Result<Transport, FetchOpError> {
        let mut transport = Transport::new();
        if let Some(path) = &self.root_cert {
            transport = transport.with_root_certificate(std::fs::read(path)?);
        }
        Ok(transport)
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Fetch {
    type Error = FetchOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let options = self.options(&ctx.config)?;
        let key = self.signing_key()?;
        let transport = self.transport()?;
        let url = self.url.clone();

        // The transport blocks for the whole round trip
        let result =
            tokio::task::spawn_blocking(move || transport.fetch(&url, &options, &key)).await?;

        match result {
            Ok(response) => Ok(serde_json::to_string_pretty(&response)?),
            Err(e) => match e.failure() {
                Some(failure) => {
                    tracing::debug!(stage = ?e.stage(), error = %e, "fetch failed");
                    Err(FetchOpError::Failed(serde_json::to_string_pretty(failure)?))
                }
                None => Err(e.into()),
            },
        }
    }
}

fn split_pair(pair: &str) -> Result<(&str, &str), FetchOpError> {
    match pair.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(FetchOpError::InvalidPair(pair.to_string())),
    }
}

/// `name=path[;type=mime]`
fn parse_file_field(field: &str) -> Result<(&str, FilePart), FetchOpError> {
    let (name, source) = split_pair(field)?;
    let (path, mime) = match source.rsplit_once(";type=") {
        Some((path, mime)) => (path, Some(mime)),
        None => (source, None),
    };

    let mut file = FilePart::new(path);
    if let Some(mime) = mime {
        file = file.mime(mime);
    }
    Ok((name, file))
}
