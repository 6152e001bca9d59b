//! Candidate confirmation.
//!
//! One oracle call per target. The request is a deterministic JSON document
//! (candidate order preserved, no timestamps) so identical inputs produce
//! identical prompts. Every item of the response is validated on its own:
//! a bad item is dropped with a warning, the rest survive.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use linkscout_common::{normalize, AnchorOrigin, Candidate, ReviewStatus, Suggestion};

use crate::error::OracleError;
use crate::oracle::decode_json_array;
use crate::traits::LanguageOracle;

const CONFIRM_SYSTEM_PROMPT: &str = r#"You are an editor planning internal links for a website.

You receive a TARGET page (title and summary) and a list of CANDIDATE sentences taken from other pages of the same site. For each candidate decide whether adding a link from that sentence to the target would genuinely help a reader.

Accept a candidate only when the sentence is about the target's topic, not just sharing a word with it. Reject navigation text, lists of unrelated items and sentences where a link would read as spam.

For every accepted candidate choose the anchor text:
- it MUST be an exact substring of the candidate sentence
- prefer a phrase from the target title ("title") or one of the keywords or a close variation of it ("keyword_variation")
- 2 to 6 words, never the whole sentence

Respond with ONLY a JSON array. Each element:
{"sourceUrl": "...", "sourceTitle": "...", "suggestedAnchorText": "...", "anchorOrigin": "title" | "keyword_variation", "context": "<the candidate sentence>", "reason": "<one short sentence>"}

Return [] when no candidate is suitable."#;

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleRequest {
    pub target_title: String,
    pub target_summary: String,
    pub candidates: Vec<OracleCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleCandidate {
    pub source_url: String,
    pub source_title: String,
    pub sentence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_keyword: Option<String>,
}

impl OracleRequest {
    pub fn new(target_title: &str, target_summary: &str, candidates: &[Candidate]) -> Self {
        Self {
            target_title: target_title.trim().to_string(),
            target_summary: target_summary.trim().to_string(),
            candidates: candidates
                .iter()
                .map(|c| OracleCandidate {
                    source_url: c.source_url.clone(),
                    source_title: c.source_title.clone(),
                    sentence: c.sentence.clone(),
                    matched_keyword: c.matched_keyword.clone(),
                })
                .collect(),
        }
    }

    pub fn render(&self) -> Result<String, OracleError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| OracleError::Request(format!("unserializable request: {e}")))
    }
}

// =============================================================================
// Response
// =============================================================================

/// One element of the oracle's answer, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleSuggestion {
    #[serde(alias = "source_url")]
    pub source_url: String,
    #[serde(default, alias = "source_title")]
    pub source_title: String,
    #[serde(alias = "suggested_anchor_text", alias = "anchorText", alias = "anchor_text")]
    pub suggested_anchor_text: String,
    #[serde(alias = "anchor_origin")]
    pub anchor_origin: String,
    #[serde(default, alias = "contextSentence", alias = "context_sentence")]
    pub context: String,
    #[serde(default, alias = "rationale")]
    pub reason: String,
}

/// Decode the oracle array. Elements that do not fit `OracleSuggestion` are
/// dropped; only an undecodable response as a whole is an error.
pub fn decode_response(raw: &str) -> Result<Vec<OracleSuggestion>, OracleError> {
    let items: Vec<serde_json::Value> = decode_json_array(raw)?;
    let total = items.len();
    let decoded: Vec<OracleSuggestion> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<OracleSuggestion>(item) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable oracle item");
                None
            }
        })
        .collect();
    if decoded.len() < total {
        warn!(total, kept = decoded.len(), "Oracle response had undecodable items");
    }
    Ok(decoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalid {
    UnknownSource,
    DuplicateSource,
    EmptyAnchor,
    UnknownOrigin,
    AnchorNotInContext,
}

// =============================================================================
// Confirmer
// =============================================================================

pub struct SuggestionConfirmer {
    oracle: Arc<dyn LanguageOracle>,
}

impl SuggestionConfirmer {
    pub fn new(oracle: Arc<dyn LanguageOracle>) -> Self {
        Self { oracle }
    }

    /// Ask the oracle which candidates deserve a link to the target. The
    /// result is unsaved: pending, unverified, at most one per source.
    pub async fn confirm(
        &self,
        target_url: &str,
        target_title: &str,
        target_summary: &str,
        candidates: &[Candidate],
    ) -> Result<Vec<Suggestion>, OracleError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let request = OracleRequest::new(target_title, target_summary, candidates);
        let raw = self
            .oracle
            .complete(CONFIRM_SYSTEM_PROMPT, &request.render()?)
            .await?;
        let items = decode_response(&raw)?;
        let returned = items.len();

        let suggestions = validate_suggestions(target_url, target_title, candidates, items);
        info!(
            target = target_url,
            candidates = candidates.len(),
            returned,
            accepted = suggestions.len(),
            "Confirmed suggestions"
        );
        Ok(suggestions)
    }
}

/// Turn decoded oracle items into suggestions, dropping every item that
/// fails validation.
pub fn validate_suggestions(
    target_url: &str,
    target_title: &str,
    candidates: &[Candidate],
    items: Vec<OracleSuggestion>,
) -> Vec<Suggestion> {
    let target_url = normalize(target_url, None);
    let by_source: HashMap<String, &Candidate> = candidates
        .iter()
        .map(|c| (normalize(&c.source_url, None), c))
        .collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for item in items {
        let source_url = normalize(&item.source_url, None);
        match validate_item(&item, by_source.get(&source_url).copied(), &seen) {
            Ok((anchor_origin, context_sentence)) => {
                let Some(candidate) = by_source.get(&source_url) else {
                    continue;
                };
                seen.insert(source_url.clone());
                out.push(Suggestion {
                    target_url: target_url.clone(),
                    target_title: target_title.to_string(),
                    source_url,
                    source_title: candidate.source_title.clone(),
                    anchor_text: item.suggested_anchor_text.trim().to_string(),
                    anchor_origin,
                    context_sentence,
                    rationale: item.reason.trim().to_string(),
                    review_status: ReviewStatus::Pending,
                    link_verified: false,
                });
            }
            Err(reason) => {
                warn!(source = %source_url, anchor = %item.suggested_anchor_text, ?reason, "Dropping oracle suggestion");
            }
        }
    }
    out
}

fn validate_item(
    item: &OracleSuggestion,
    candidate: Option<&Candidate>,
    seen: &HashSet<String>,
) -> Result<(AnchorOrigin, String), Invalid> {
    let candidate = candidate.ok_or(Invalid::UnknownSource)?;
    if seen.contains(&normalize(&candidate.source_url, None)) {
        return Err(Invalid::DuplicateSource);
    }

    let anchor = item.suggested_anchor_text.trim();
    if anchor.is_empty() {
        return Err(Invalid::EmptyAnchor);
    }
    let origin: AnchorOrigin = item
        .anchor_origin
        .parse()
        .map_err(|_| Invalid::UnknownOrigin)?;

    // The anchor has to exist on the source page. The oracle's tidied
    // context is used only while it still contains the anchor.
    let needle = anchor.to_lowercase();
    if !candidate.sentence.to_lowercase().contains(&needle) {
        return Err(Invalid::AnchorNotInContext);
    }
    let tidied = item.context.split_whitespace().collect::<Vec<_>>().join(" ");
    let context = if tidied.to_lowercase().contains(&needle) {
        tidied
    } else {
        candidate.sentence.clone()
    };
    Ok((origin, context))
}
