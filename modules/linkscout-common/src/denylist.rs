use crate::url_norm::normalize;

/// Path prefixes marking archive, taxonomy, account and legal pages.
/// These are structurally unsuitable as link sources.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "/category",
    "/tag",
    "/tags",
    "/author",
    "/page",
    "/feed",
    "/privacy",
    "/privacy-policy",
    "/terms",
    "/terms-of-service",
    "/terms-and-conditions",
    "/cookie-policy",
    "/cookies",
    "/disclaimer",
    "/legal",
    "/imprint",
    "/impressum",
    "/sitemap",
    "/wp-admin",
    "/wp-login.php",
    "/login",
    "/account",
    "/my-account",
    "/cart",
    "/checkout",
];

/// Non-content URL denylist. A pattern is one or more whole path segments
/// and matches wherever those segments appear in the canonical URL path,
/// so `/tag` excludes `/tag/diet` and `/blog/tag/diet` but not `/tagline`.
#[derive(Debug, Clone)]
pub struct UrlDenylist {
    patterns: Vec<String>,
}

impl UrlDenylist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| segment_pattern(p.as_ref()))
            .collect();
        Self { patterns }
    }

    /// Parse a comma-separated pattern list (the `EXCLUDE_URL_PATTERNS` format).
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        let canonical = normalize(url, None).to_lowercase();
        let path = url_path(&canonical);
        self.patterns.iter().any(|p| contains_segments(path, p))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for UrlDenylist {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDE_PATTERNS)
    }
}

/// `" Events/ "` becomes `"/events"`. Blank and root-only patterns are dropped.
fn segment_pattern(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/').to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("/{trimmed}"))
}

fn url_path(canonical: &str) -> &str {
    let rest = canonical
        .split_once("://")
        .map_or(canonical, |(_, rest)| rest);
    rest.find('/').map_or("", |i| &rest[i..])
}

fn contains_segments(path: &str, pattern: &str) -> bool {
    path.match_indices(pattern)
        .any(|(i, _)| matches!(path[i + pattern.len()..].chars().next(), None | Some('/')))
}
