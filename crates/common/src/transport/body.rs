//! Request body assembly
//!
//! Bodies are fully materialized before dispatch: the signer and the wire
//! see the same bytes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use serde_json::{Map, Value};

use super::options::{BodyOption, FilePart};
use super::response::FetchError;

/// Content type for text and map bodies
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A body ready to sign and send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub kind: BodyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Text,
    Multipart,
}

impl AssembledBody {
    fn json_text(text: String) -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE.to_string(),
            bytes: text.into_bytes(),
            kind: BodyKind::Text,
        }
    }
}

/// Resolve the caller's body option into bytes
///
/// Returns `Ok(None)` when no body was supplied.
pub fn assemble(body: Option<&BodyOption>) -> Result<Option<AssembledBody>, FetchError> {
    let body = match body {
        Some(body) => body,
        None => return Ok(None),
    };

    let assembled = match body {
        BodyOption::Text(text) => AssembledBody::json_text(text.clone()),
        BodyOption::Map(map) => match form_parts(map) {
            Some(parts) => multipart(parts)?,
            None => AssembledBody::json_text(Value::Object(map.clone()).to_string()),
        },
    };

    tracing::debug!(
        kind = ?assembled.kind,
        bytes = assembled.bytes.len(),
        "assembled request body"
    );

    Ok(Some(assembled))
}

static NO_PARTS: Value = Value::Null;

/// The `_parts` value of a form body, if the map is one
fn form_parts(map: &Map<String, Value>) -> Option<&Value> {
    if let Some(form) = map.get("formData") {
        return Some(form.get("_parts").unwrap_or(&NO_PARTS));
    }
    map.get("_parts")
}

enum Part {
    Text { name: String, value: String },
    File { name: String, file: FilePart },
}

fn parse_parts(parts: &Value) -> Result<Vec<Part>, FetchError> {
    let entries = match parts {
        Value::Array(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        other => return Err(FetchError::Body(format!("_parts must be an array, got {other}"))),
    };

    entries
        .iter()
        .map(|entry| {
            let pair = entry
                .as_array()
                .filter(|pair| pair.len() == 2)
                .ok_or_else(|| FetchError::Body(format!("part {entry} is not a [name, value] pair")))?;

            let name = match &pair[0] {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            };

            if let Some(file) = FilePart::from_value(&pair[1]) {
                return Ok(Part::File { name, file });
            }

            let value = match &pair[1] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(Part::Text { name, value })
        })
        .collect()
}

fn multipart(parts: &Value) -> Result<AssembledBody, FetchError> {
    let parts = parse_parts(parts)?;
    let boundary = uuid::Uuid::new_v4().to_string();
    let mut writer = MultipartWriter::new(&boundary);

    for part in parts {
        match part {
            Part::Text { name, value } => writer.text(&name, &value),
            Part::File { name, file } => match read_via_temp_file(&file) {
                Ok(bytes) => {
                    writer.file(&name, &file.resolved_file_name(), &file.resolved_mime(), &bytes)
                }
                Err(e) => {
                    tracing::warn!(
                        part = %name,
                        path = %file.path().display(),
                        error = %e,
                        "skipping unreadable file part"
                    );
                }
            },
        }
    }

    Ok(AssembledBody {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        bytes: writer.finish(),
        kind: BodyKind::Multipart,
    })
}

/// Copy the source into a scratch file and read the copy back
///
/// Both handles are dropped when this returns, on success or failure.
fn read_via_temp_file(file: &FilePart) -> io::Result<Vec<u8>> {
    let mut source = File::open(file.path())?;
    let mut scratch = tempfile::tempfile()?;

    io::copy(&mut source, &mut scratch)?;
    scratch.seek(SeekFrom::Start(0))?;

    let mut bytes = Vec::new();
    scratch.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// `multipart/form-data` encoder
struct MultipartWriter<'a> {
    boundary: &'a str,
    buf: Vec<u8>,
}

impl<'a> MultipartWriter<'a> {
    fn new(boundary: &'a str) -> Self {
        Self {
            boundary,
            buf: Vec::new(),
        }
    }

    fn open_part(&mut self, disposition: &str, content_type: Option<&str>) {
        self.buf.extend_from_slice(b"--");
        self.buf.extend_from_slice(self.boundary.as_bytes());
        self.buf.extend_from_slice(b"\r\nContent-Disposition: ");
        self.buf.extend_from_slice(disposition.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        if let Some(content_type) = content_type {
            self.buf.extend_from_slice(b"Content-Type: ");
            self.buf.extend_from_slice(content_type.as_bytes());
            self.buf.extend_from_slice(b"\r\n");
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    fn text(&mut self, name: &str, value: &str) {
        self.open_part(&format!("form-data; name=\"{}\"", quote(name)), None);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    fn file(&mut self, name: &str, file_name: &str, mime: &str, bytes: &[u8]) {
        let disposition = format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            quote(name),
            quote(file_name)
        );
        self.open_part(&disposition, Some(mime));
        self.buf.extend_from_slice(bytes);
        self.buf.extend_from_slice(b"\r\n");
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(b"--");
        self.buf.extend_from_slice(self.boundary.as_bytes());
        self.buf.extend_from_slice(b"--\r\n");
        self.buf
    }
}

/// Escape a disposition parameter the way browsers do
fn quote(value: &str) -> String {
    value
        .replace('\n', "%0A")
        .replace('\r', "%0D")
        .replace('"', "%22")
}
