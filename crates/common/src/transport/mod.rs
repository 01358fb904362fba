//! Certificate-pinned HTTP transport
//!
//! Every fetch runs the same pipeline:
//!
//! ```text
//! Validating -> AssemblingBody -> Signing -> Dispatching -> (Success | Failure)
//! ```
//!
//! - **Validating**: strict URL syntax check, pin parsing, method and header
//!   validation. Nothing touches the network if this fails.
//! - **AssemblingBody**: text, map or multipart body materialized into bytes.
//!   POST, PUT and PATCH without a body stop here.
//! - **Signing**: with both a key id and a request id, the body bytes are
//!   signed and the token attached as `X-JWS-Signature`. An unavailable
//!   signer yields an empty header, it never blocks the request.
//! - **Dispatching**: exactly one attempt with the caller's timeout and pins.
//!
//! The dispatch is blocking. Async callers should run it on a blocking
//! thread (`tokio::task::spawn_blocking`).

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use rustls::pki_types::CertificateDer;

use crate::crypto::{self, SIGNATURE_HEADER};

mod body;
mod curl;
mod options;
mod pinning;
mod response;
mod target;

pub use body::{AssembledBody, BodyKind, JSON_CONTENT_TYPE};
pub use options::{BodyOption, FilePart, FormData, HeaderOption, RequestOptions};
pub use pinning::{Pin, PinSet};
pub use response::{Elapsed, FetchError, FetchFailure, FetchResponse, Stage};
pub use target::{is_valid_url, pin_hostname};

/// One outbound request after validation, body assembly and signing
///
/// Built fresh per fetch and consumed by [`Transport::dispatch`].
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    headers: Vec<(String, String)>,
    pub body: Option<AssembledBody>,
    /// Detached token, present when signing was requested (possibly empty)
    pub signature: Option<String>,
    pub pins: Option<PinSet>,
    pub timeout: Option<Duration>,
    pub logger_enabled: bool,
}

impl PreparedRequest {
    /// Headers in the order they are sent
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// `curl` rendering with the signature redacted
    pub fn to_curl(&self) -> String {
        curl::render(self)
    }

    fn header_map(&self) -> Result<HeaderMap, FetchError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            map.append(name, value);
        }
        Ok(map)
    }
}

/// Pinned HTTP client
///
/// Cheap to construct and clone. A fresh TLS configuration is built per
/// request since pins are scoped to the request's host.
#[derive(Debug, Clone, Default)]
pub struct Transport {
    extra_roots: Vec<CertificateDer<'static>>,
    default_timeout: Option<Duration>,
    logger_enabled: bool,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust an additional root (DER) on top of the bundled Mozilla roots
    pub fn with_root_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.extra_roots.push(CertificateDer::from(der.into()));
        self
    }

    /// Timeout used when the request options carry none
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Log every request as curl, regardless of the per-request toggle
    pub fn with_logger(mut self, enabled: bool) -> Self {
        self.logger_enabled = enabled;
        self
    }

    /// Validate, assemble and sign a request without sending it
    ///
    /// `signing_key` is the raw shared secret; pass an empty slice when no
    /// key has been agreed yet.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The URL fails the syntax check
    /// - A pin, the method or a header is invalid
    /// - The body cannot be assembled, or POST/PUT/PATCH has no body
    pub fn prepare(
        &self,
        url: &str,
        options: &RequestOptions,
        signing_key: &[u8],
    ) -> Result<PreparedRequest, FetchError> {
        if !is_valid_url(url) {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let pins = match &options.certificates {
            Some(pins) if !pins.is_empty() => Some(PinSet::new(&pin_hostname(url), pins)?),
            _ => None,
        };
        let method = parse_method(options.method.as_deref())?;

        let mut flat = Vec::new();
        for (name, value) in &options.headers {
            value.flatten_into(name, &mut flat);
        }
        let mut headers = Vec::with_capacity(flat.len() + 2);
        for (name, value) in flat {
            parse_header(name, value)?;
            headers.push((name.to_string(), value.to_string()));
        }

        let body = body::assemble(options.body.as_ref())?;
        match &body {
            Some(body) => {
                headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
                headers.push(("Content-Type".to_string(), body.content_type.clone()));
            }
            None if requires_body(&method) => return Err(FetchError::MissingBody(method)),
            None => {}
        }

        let signature = options.signing_ids().map(|(key_id, request_id)| {
            let payload = body.as_ref().map(|b| b.bytes.as_slice()).unwrap_or_default();
            let token = crypto::sign(payload, key_id, request_id, signing_key);
            tracing::debug!(
                stage = ?Stage::Signing,
                key_id,
                request_id,
                signed = !token.is_empty(),
                "attached request signature"
            );
            token
        });
        if let Some(token) = &signature {
            headers.push((SIGNATURE_HEADER.to_string(), token.clone()));
        }

        Ok(PreparedRequest {
            method,
            url: url.to_string(),
            headers,
            body,
            signature,
            pins,
            timeout: options.timeout_duration(),
            logger_enabled: options.logger_is_enabled,
        })
    }

    /// Send a prepared request, exactly once
    pub fn dispatch(&self, request: PreparedRequest) -> Result<FetchResponse, FetchError> {
        let logger_enabled = self.logger_enabled || request.logger_enabled;
        if logger_enabled {
            tracing::info!(curl = %request.to_curl(), "outgoing request");
        }

        let tls = pinning::client_config(&self.extra_roots, request.pins.clone())?;
        let timeout = self.timeout_for(&request);
        // `None` also clears the blocking client's built-in 30s deadline
        let client = reqwest::blocking::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        let mut outgoing = client
            .request(request.method.clone(), &request.url)
            .headers(request.header_map()?);
        if let Some(body) = request.body {
            outgoing = outgoing.body(body.bytes);
        }

        tracing::debug!(
            stage = ?Stage::Dispatching,
            method = %request.method,
            url = %request.url,
            pinned = request.pins.is_some(),
            "dispatching request"
        );

        let started = Instant::now();
        let response = match outgoing.send() {
            Ok(response) => response,
            Err(source) => {
                tracing::warn!(url = %request.url, error = %source, "request failed");
                return Err(FetchError::Transport {
                    failure: FetchFailure::io(),
                    source,
                });
            }
        };
        let duration = Elapsed(started.elapsed());
        let status = response.status();
        let final_url = response.url().to_string();

        let body = match response.bytes() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(source) => {
                tracing::warn!(url = %final_url, error = %source, "failed to read response body");
                return Err(FetchError::Transport {
                    failure: FetchFailure {
                        status: Some(status.as_u16()),
                        url: Some(final_url),
                        duration: Some(duration),
                        error: response::EMPTY_BODY.to_string(),
                    },
                    source,
                });
            }
        };

        if logger_enabled {
            tracing::info!(
                status = status.as_u16(),
                duration = %duration,
                bytes = body.len(),
                "response received"
            );
        }

        if !status.is_success() {
            return Err(FetchError::Status(FetchFailure {
                status: Some(status.as_u16()),
                url: Some(final_url),
                duration: Some(duration),
                error: body,
            }));
        }

        Ok(FetchResponse {
            status: status.as_u16(),
            url: final_url,
            duration,
            response: body,
        })
    }

    /// Bound applied to a request's connect and to its whole exchange
    ///
    /// The request's own timeout wins over the transport default. With
    /// neither set the request is unbounded.
    pub fn timeout_for(&self, request: &PreparedRequest) -> Option<Duration> {
        request.timeout.or(self.default_timeout)
    }

    /// Prepare and dispatch in one call
    pub fn fetch(
        &self,
        url: &str,
        options: &RequestOptions,
        signing_key: &[u8],
    ) -> Result<FetchResponse, FetchError> {
        let request = self.prepare(url, options, signing_key)?;
        self.dispatch(request)
    }
}

fn parse_method(method: Option<&str>) -> Result<Method, FetchError> {
    let method = method.unwrap_or("GET").trim().to_ascii_uppercase();
    Method::from_bytes(method.as_bytes()).map_err(|_| FetchError::InvalidMethod(method))
}

fn requires_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), FetchError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
    Ok((header_name, header_value))
}
