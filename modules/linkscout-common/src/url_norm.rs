//! Canonical URL form used for every URL comparison in the pipeline.
//!
//! Two URLs that name the same page modulo scheme, a leading `www.`, one
//! trailing slash, letter case, query string or fragment normalize to the
//! same string. `normalize` never fails: input the `url` crate cannot parse
//! falls back to plain string transforms. Callers that must *exclude*
//! unparseable input (derived link sets) use `try_normalize` instead.

use url::Url;

/// Hrefs that never point at another page.
const NON_NAVIGATIONAL_PREFIXES: &[&str] = &["#", "mailto:", "tel:", "javascript:", "data:"];

/// Canonicalize `raw`, resolving it against `base` when it is relative.
pub fn normalize(raw: &str, base: Option<&str>) -> String {
    try_normalize(raw, base).unwrap_or_else(|| fallback(raw))
}

/// Canonicalize `raw`, or `None` when it is not an http(s) page reference.
pub fn try_normalize(raw: &str, base: Option<&str>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if NON_NAVIGATIONAL_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return None;
    }

    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(b) => parse_base(b)?.join(raw).ok()?,
            None => Url::parse(&assume_https(raw)?).ok()?,
        },
        Err(_) => return None,
    };

    canonical(&parsed)
}

/// True when both URLs normalize to the same canonical string.
pub fn same_resource(a: &str, b: &str) -> bool {
    normalize(a, None) == normalize(b, None)
}

fn parse_base(base: &str) -> Option<Url> {
    let base = base.trim();
    Url::parse(base)
        .ok()
        .or_else(|| assume_https(base).and_then(|s| Url::parse(&s).ok()))
}

/// Scheme-less hosts (`//cdn.example.com/x`, `www.example.com/x`).
fn assume_https(raw: &str) -> Option<String> {
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if raw.to_ascii_lowercase().starts_with("www.") {
        return Some(format!("https://{raw}"));
    }
    None
}

fn canonical(u: &Url) -> Option<String> {
    if u.scheme() != "http" && u.scheme() != "https" {
        return None;
    }
    let host = u.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }

    let port = match u.port() {
        Some(80) | Some(443) | None => String::new(),
        Some(p) => format!(":{p}"),
    };

    let mut path = u.path().to_lowercase();
    if path.ends_with('/') {
        path.pop();
    }

    Some(format!("https://{host}{port}{path}"))
}

fn fallback(raw: &str) -> String {
    let mut s = raw.trim().to_lowercase();
    if let Some(i) = s.find('#') {
        s.truncate(i);
    }
    if let Some(i) = s.find('?') {
        s.truncate(i);
    }
    if let Some(rest) = s.strip_prefix("http://") {
        s = format!("https://{rest}");
    }
    if let Some(rest) = s.strip_prefix("https://www.") {
        s = format!("https://{rest}");
    } else if let Some(rest) = s.strip_prefix("www.") {
        s = rest.to_string();
    }
    if s.ends_with('/') {
        s.pop();
    }
    s
}
