use crate::crypto::SIGNATURE_HEADER;

use super::body::BodyKind;
use super::PreparedRequest;

const REDACTED: &str = "<redacted>";

/// Render a prepared request as a `curl` command for diagnostics
///
/// The signature header value is redacted. Multipart bodies are not inlined.
pub fn render(request: &PreparedRequest) -> String {
    let mut out = format!("curl -X {} {}", request.method, shell_quote(&request.url));

    for (name, value) in request.headers() {
        let value = if name.eq_ignore_ascii_case(SIGNATURE_HEADER) && !value.is_empty() {
            REDACTED
        } else {
            value
        };
        out.push_str(" -H ");
        out.push_str(&shell_quote(&format!("{name}: {value}")));
    }

    if let Some(body) = &request.body {
        match body.kind {
            BodyKind::Text => {
                out.push_str(" --data-raw ");
                out.push_str(&shell_quote(&String::from_utf8_lossy(&body.bytes)));
            }
            BodyKind::Multipart => out.push_str(" --data-binary @-"),
        }
    }

    out
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
