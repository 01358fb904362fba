use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Where in the request lifecycle a fetch stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    AssemblingBody,
    Signing,
    Dispatching,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("url is invalid: {0}")]
    InvalidUrl(String),
    #[error("for {0} method body option is required")]
    MissingBody(reqwest::Method),
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("invalid certificate pin: {0}")]
    InvalidPin(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid body: {0}")]
    Body(String),
    #[error("tls configuration error: {0}")]
    Tls(String),
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("request failed with status {}", .0.status.unwrap_or_default())]
    Status(FetchFailure),
    #[error("transport error: {source}")]
    Transport {
        failure: FetchFailure,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Result shape to hand back to the caller, when the request got far
    /// enough to have one
    pub fn failure(&self) -> Option<&FetchFailure> {
        match self {
            FetchError::Status(failure) | FetchError::Transport { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            FetchError::InvalidUrl(_)
            | FetchError::InvalidMethod(_)
            | FetchError::InvalidPin(_)
            | FetchError::InvalidHeader(_)
            | FetchError::Tls(_)
            | FetchError::Client(_) => Stage::Validating,
            FetchError::MissingBody(_) | FetchError::Body(_) => Stage::AssemblingBody,
            FetchError::Status(_) | FetchError::Transport { .. } => Stage::Dispatching,
        }
    }

    /// Whether the failure happened at the I/O level, including timeouts
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transport { source, .. } if source.is_timeout())
    }
}

/// Round-trip time, rendered as `"<n>ms"`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Elapsed(pub Duration);

impl Elapsed {
    pub fn as_millis(&self) -> u128 {
        self.0.as_millis()
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

impl fmt::Debug for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Elapsed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let millis = s
            .strip_suffix("ms")
            .unwrap_or(s)
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {s:?}: {e}"))?;
        Ok(Self(Duration::from_millis(millis)))
    }
}

impl Serialize for Elapsed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Elapsed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Successful fetch: any status below 400 that the client reports as success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub duration: Elapsed,
    pub response: String,
}

impl FetchResponse {
    /// Body parsed as JSON, `{}` when it is not JSON
    pub fn json(&self) -> Value {
        parse_json(&self.response)
    }
}

/// Failed fetch
///
/// `status`, `url` and `duration` are absent when no response arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Elapsed>,
    pub error: String,
}

impl FetchFailure {
    /// Failure with no response, carrying the placeholder body
    pub(crate) fn io() -> Self {
        Self {
            status: None,
            url: None,
            duration: None,
            error: EMPTY_BODY.to_string(),
        }
    }

    pub fn json(&self) -> Value {
        parse_json(&self.error)
    }
}

/// Body reported when nothing was read from the wire
pub(crate) const EMPTY_BODY: &str = "{}";

fn parse_json(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::Object(Default::default()))
}
