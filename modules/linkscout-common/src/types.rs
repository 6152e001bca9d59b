use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pages and fragments
// ---------------------------------------------------------------------------

/// An indexed page. `url` is canonical (see `url_norm::normalize`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    /// Set once keywords have been generated. While set, keywords are
    /// never regenerated; `clear_keywords` resets it.
    pub keywords_generated_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
}

impl Page {
    pub fn has_keywords(&self) -> bool {
        self.keywords_generated_at.is_some()
    }
}

/// A stored sentence or heading fragment of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub page_url: String,
    pub page_title: String,
    pub text: String,
    /// Canonical URLs linked from inside this fragment.
    pub outbound_links: BTreeSet<String>,
}

/// A hyperlink found inside a content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineLink {
    pub href: String,
    pub anchor_text: String,
}

/// A block-level run of page text (paragraph, list item, heading, ...)
/// together with the links embedded in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub text: String,
    pub links: Vec<InlineLink>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            links: Vec::new(),
        }
    }

    pub fn with_link(mut self, href: impl Into<String>, anchor_text: impl Into<String>) -> Self {
        self.links.push(InlineLink {
            href: href.into(),
            anchor_text: anchor_text.into(),
        });
        self
    }
}

/// What the content extractor returns for one fetched page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub url: String,
    pub title: String,
    pub plain_text: String,
    pub blocks: Vec<ContentBlock>,
    /// Canonical outbound links of the whole page.
    pub outbound_links: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Candidates and suggestions
// ---------------------------------------------------------------------------

/// An unconfirmed (source page, fragment) pairing. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_url: String,
    pub source_title: String,
    pub sentence: String,
    /// Longest target keyword occurring in `sentence`.
    pub matched_keyword: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorOrigin {
    /// Anchor derived from the target page's title.
    #[serde(alias = "title_derived", alias = "title-derived")]
    Title,
    /// Anchor is a keyword or a close variation of one.
    #[serde(alias = "keyword-variation", alias = "keyword")]
    KeywordVariation,
}

impl AnchorOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::KeywordVariation => "keyword_variation",
        }
    }
}

impl fmt::Display for AnchorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorOrigin {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" | "title_derived" | "title-derived" => Ok(Self::Title),
            "keyword_variation" | "keyword-variation" | "keyword" => Ok(Self::KeywordVariation),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

/// Human review state. Only ever written by the external review surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Accepted,
    Dismissed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "dismissed" => Ok(Self::Dismissed),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tag: {0}")]
pub struct UnknownTag(pub String);

/// A reviewable recommendation to link `source_url` → `target_url`.
/// Identity is the `(target_url, source_url)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub target_url: String,
    pub target_title: String,
    pub source_url: String,
    pub source_title: String,
    pub anchor_text: String,
    pub anchor_origin: AnchorOrigin,
    pub context_sentence: String,
    pub rationale: String,
    pub review_status: ReviewStatus,
    pub link_verified: bool,
}

impl Suggestion {
    pub fn key(&self) -> (&str, &str) {
        (&self.target_url, &self.source_url)
    }
}

// ---------------------------------------------------------------------------
// Run configuration and summaries
// ---------------------------------------------------------------------------

/// When the link-existence check runs relative to first persistence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkCheckMode {
    /// Fetch each source before storing; drop already-linked suggestions.
    Immediate,
    /// Store unverified; a recurring batch converges them later.
    #[default]
    Deferred,
}

impl FromStr for LinkCheckMode {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "deferred" => Ok(Self::Deferred),
            other => Err(UnknownTag(other.to_string())),
        }
    }
}

/// Per-item outcome counts for a batch operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl BatchSummary {
    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} succeeded={} failed={}",
            self.processed, self.succeeded, self.failed
        )
    }
}
