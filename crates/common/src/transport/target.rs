use std::sync::OnceLock;

use regex::Regex;

// Same character classes the mobile clients accept, anchored on both ends
const URL_PATTERN: &str =
    r"^(https?|ftp|file)://[-a-zA-Z0-9+&@#/%?=~_|!:,.;]*[-a-zA-Z0-9+&@#/%=~_|]$";

fn url_regex() -> Option<&'static Regex> {
    static URL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    URL_REGEX
        .get_or_init(|| Regex::new(URL_PATTERN).ok())
        .as_ref()
}

/// Whether `url` passes the strict syntax check done before any dispatch
pub fn is_valid_url(url: &str) -> bool {
    url_regex().is_some_and(|re| re.is_match(url))
}

/// Strip a leading `www.` label
pub(crate) fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Hostname pins are scoped to
///
/// The URL host with a leading `www.` removed. Falls back to the raw URL
/// when it has no parseable host.
pub fn pin_hostname(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => strip_www(host).to_ascii_lowercase(),
            None => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}
