use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Per-request configuration
///
/// Mirrors the options object mobile callers pass to `fetch`, so it can be
/// deserialized straight from their JSON:
///
/// ```json
/// {
///   "method": "POST",
///   "headers": { "Accept": "application/json" },
///   "body": "{\"amount\":42}",
///   "certificates": ["sha256/AAAA..."],
///   "timeout": 10000,
///   "loggerIsEnabled": false,
///   "keyId": "kid-1",
///   "requestId": "3f0c..."
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, HeaderOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificates: Option<Vec<String>>,
    /// Milliseconds, applied to connect, read and write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub logger_is_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into(), HeaderOption::Value(value.into()));
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(BodyOption::Text(body.into()));
        self
    }

    pub fn form(mut self, form: FormData) -> Self {
        self.body = Some(form.into_body());
        self
    }

    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.certificates.get_or_insert_with(Vec::new).push(pin.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn logger(mut self, enabled: bool) -> Self {
        self.logger_is_enabled = enabled;
        self
    }

    /// Ask for the body to be signed under `key_id`
    pub fn signed(mut self, key_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self.request_id = Some(request_id.into());
        self
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// Key id and request id, when both are present
    pub fn signing_ids(&self) -> Option<(&str, &str)> {
        match (&self.key_id, &self.request_id) {
            (Some(kid), Some(rid)) => Some((kid, rid)),
            _ => None,
        }
    }
}

/// A header value as supplied by the caller
///
/// Nested maps are flattened into their leaf entries when the request is
/// built. Any other JSON value is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderOption {
    Value(String),
    Nested(BTreeMap<String, HeaderOption>),
    Ignored(Value),
}

impl HeaderOption {
    pub(crate) fn flatten_into<'a>(&'a self, name: &'a str, out: &mut Vec<(&'a str, &'a str)>) {
        match self {
            HeaderOption::Value(value) => out.push((name, value)),
            HeaderOption::Nested(map) => {
                for (name, value) in map {
                    value.flatten_into(name, out);
                }
            }
            HeaderOption::Ignored(_) => {}
        }
    }
}

/// Request body as supplied by the caller
///
/// A map carrying `formData` or `_parts` is sent as `multipart/form-data`;
/// any other map is sent as its JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BodyOption {
    Text(String),
    Map(Map<String, Value>),
}

/// Builder for multipart bodies in the `_parts` shape
///
/// # Examples
///
/// ```ignore
/// let form = FormData::new()
///     .text("caption", "receipt")
///     .file("upload", FilePart::new("/tmp/receipt.png").mime("image/png"));
/// let options = RequestOptions::new().method("POST").form(form);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    parts: Vec<Value>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(json!([name.into(), value.into()]));
        self
    }

    pub fn file(mut self, name: impl Into<String>, file: FilePart) -> Self {
        self.parts.push(json!([name.into(), file.to_value()]));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn into_body(self) -> BodyOption {
        let mut map = Map::new();
        map.insert("_parts".to_string(), Value::Array(self.parts));
        BodyOption::Map(map)
    }
}

/// A file reference inside a multipart body
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub uri: String,
    pub mime: Option<String>,
    pub file_name: Option<String>,
}

impl FilePart {
    /// `uri` may be a `file://` URI or a bare path
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime: None,
            file_name: None,
        }
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Interpret a `_parts` value as a file reference
    ///
    /// Matches maps that carry `type` and one of `uri`/`path`. A `type` of
    /// `null` still marks the part as a file; the MIME type is then guessed.
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if !map.contains_key("type") {
            return None;
        }
        let uri = map
            .get("uri")
            .or_else(|| map.get("path"))
            .and_then(Value::as_str)?;
        let file_name = map
            .get("fileName")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let mime = map
            .get("type")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Some(Self {
            uri: uri.to_string(),
            mime,
            file_name,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("uri".to_string(), Value::String(self.uri.clone()));
        map.insert(
            "type".to_string(),
            self.mime.clone().map(Value::String).unwrap_or(Value::Null),
        );
        if let Some(name) = &self.file_name {
            map.insert("fileName".to_string(), Value::String(name.clone()));
        }
        Value::Object(map)
    }

    /// Local path this part reads from
    pub fn path(&self) -> PathBuf {
        match url::Url::parse(&self.uri) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(url.path())),
            _ => PathBuf::from(&self.uri),
        }
    }

    /// File name sent in the part's `Content-Disposition`
    pub fn resolved_file_name(&self) -> String {
        self.file_name.clone().unwrap_or_else(|| {
            self.path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    /// Caller supplied type, else a guess from the file name
    pub fn resolved_mime(&self) -> String {
        self.mime.clone().unwrap_or_else(|| {
            mime_guess::from_path(self.resolved_file_name())
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_deserialize_mobile_options() {
        let options: RequestOptions = serde_json::from_value(json!({
            "method": "post",
            "headers": { "Accept": "application/json", "extra": { "X-Trace": "1" }, "n": 5 },
            "body": "{\"a\":1}",
            "certificates": ["sha256/abc"],
            "timeout": 2500,
            "loggerIsEnabled": true,
            "keyId": "kid",
            "requestId": "rid"
        }))
        .unwrap();

        assert_eq!(options.method.as_deref(), Some("post"));
        assert_eq!(options.body, Some(BodyOption::Text("{\"a\":1}".to_string())));
        assert_eq!(options.timeout_duration(), Some(Duration::from_millis(2500)));
        assert!(options.logger_is_enabled);
        assert_eq!(options.signing_ids(), Some(("kid", "rid")));
        assert!(matches!(options.headers.get("n"), Some(HeaderOption::Ignored(_))));
    }

    #[test]
    fn test_missing_fields_default() {
        let options: RequestOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, RequestOptions::default());
        assert_eq!(options.signing_ids(), None);
    }

    #[test]
    fn test_signing_ids_need_both() {
        let mut options = RequestOptions::new();
        options.key_id = Some("kid".to_string());
        assert_eq!(options.signing_ids(), None);
    }

    #[test]
    fn test_nested_headers_flatten() {
        let options: RequestOptions = serde_json::from_value(json!({
            "headers": {
                "Accept": "text/plain",
                "group": { "X-One": "1", "inner": { "X-Two": "2" } }
            }
        }))
        .unwrap();

        let mut flat = Vec::new();
        for (name, value) in &options.headers {
            value.flatten_into(name, &mut flat);
        }

        assert_eq!(
            flat,
            vec![("Accept", "text/plain"), ("X-One", "1"), ("X-Two", "2")]
        );
    }

    #[test]
    fn test_form_data_shape() {
        let body = FormData::new()
            .text("caption", "hi")
            .file("doc", FilePart::new("/tmp/a.pdf").mime("application/pdf"))
            .into_body();

        let expected = json!({
            "_parts": [
                ["caption", "hi"],
                ["doc", { "uri": "/tmp/a.pdf", "type": "application/pdf" }]
            ]
        });
        assert_eq!(serde_json::to_value(&body).unwrap(), expected);
    }

    #[test]
    fn test_file_part_detection() {
        let part = FilePart::from_value(&json!({
            "path": "file:///tmp/photo.jpg",
            "type": "image/jpeg",
            "name": "photo.jpg"
        }))
        .unwrap();

        assert_eq!(part.path(), PathBuf::from("/tmp/photo.jpg"));
        assert_eq!(part.resolved_file_name(), "photo.jpg");
        assert_eq!(part.resolved_mime(), "image/jpeg");

        assert!(FilePart::from_value(&json!({ "uri": "/tmp/x" })).is_none());
        assert!(FilePart::from_value(&json!({ "type": "text/plain" })).is_none());
        assert!(FilePart::from_value(&json!("plain")).is_none());
    }

    #[test]
    fn test_file_part_name_and_mime_fallbacks() {
        let part = FilePart::new("/var/data/report.csv");
        assert_eq!(part.resolved_file_name(), "report.csv");
        assert_eq!(part.resolved_mime(), "text/csv");

        let unknown = FilePart::new("/var/data/blob.zzzunknown");
        assert_eq!(unknown.resolved_mime(), "application/octet-stream");
    }
}
