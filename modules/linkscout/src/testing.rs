// Test doubles for the backlink pipeline.
//
// One double per trait seam:
// - MemoryStore (PageStore + SentenceStore + SuggestionStore): in-memory rows
// - MockExtractor (ContentExtractor): URL → page or error, with fetch log
// - ScriptedOracle (LanguageOracle): canned responses in order
// - EchoOracle (LanguageOracle): accepts every candidate it is shown
//
// Plus helpers for building pages and suggestions.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use linkscout_common::{
    normalize, AnchorOrigin, ContentBlock, ExtractedPage, Page, ReviewStatus, Sentence, Suggestion,
};

use crate::error::{FetchError, OracleError, StoreError};
use crate::html::parse_html;
use crate::traits::{ContentExtractor, LanguageOracle, PageStore, SentenceStore, SuggestionStore};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    pages: HashMap<String, Page>,
    sentences: Vec<Sentence>,
    suggestions: Vec<Suggestion>,
    fail_writes_for: HashSet<String>,
}

/// In-memory store. Fragments and suggestions keep insertion order, which
/// stands in for `id` / `created_at` ordering in Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All stored suggestions in insertion order.
    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.lock().suggestions.clone()
    }

    pub fn suggestion(&self, target_url: &str, source_url: &str) -> Option<Suggestion> {
        self.lock()
            .suggestions
            .iter()
            .find(|s| s.key() == (target_url, source_url))
            .cloned()
    }

    /// Stand-in for the external review surface.
    pub fn set_review_status(&self, target_url: &str, source_url: &str, status: ReviewStatus) {
        if let Some(s) = self
            .lock()
            .suggestions
            .iter_mut()
            .find(|s| s.key() == (target_url, source_url))
        {
            s.review_status = status;
        }
    }

    pub fn sentence_count(&self) -> usize {
        self.lock().sentences.len()
    }

    /// Make verification writes for `source_url` fail.
    pub fn fail_writes_for(&self, source_url: &str) {
        self.lock().fail_writes_for.insert(source_url.to_string());
    }

    fn check_write(state: &MemoryState, source_url: &str) -> Result<(), StoreError> {
        if state.fail_writes_for.contains(source_url) {
            return Err(StoreError::Unavailable(format!("write rejected for {source_url}")));
        }
        Ok(())
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn get_page(&self, url: &str) -> Result<Option<Page>, StoreError> {
        Ok(self.lock().pages.get(url).cloned())
    }

    async fn upsert_page(&self, url: &str, title: &str, content: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let now = Utc::now();
        state
            .pages
            .entry(url.to_string())
            .and_modify(|p| {
                p.title = title.to_string();
                p.content = content.to_string();
                p.indexed_at = now;
            })
            .or_insert_with(|| Page {
                url: url.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                keywords: Vec::new(),
                keywords_generated_at: None,
                indexed_at: now,
            });
        Ok(())
    }

    async fn set_keywords(&self, url: &str, keywords: &[String]) -> Result<(), StoreError> {
        if let Some(page) = self.lock().pages.get_mut(url) {
            page.keywords = keywords.to_vec();
            page.keywords_generated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn clear_keywords(&self, url: &str) -> Result<bool, StoreError> {
        Ok(match self.lock().pages.get_mut(url) {
            Some(page) => {
                page.keywords.clear();
                page.keywords_generated_at = None;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl SentenceStore for MemoryStore {
    async fn replace_sentences(
        &self,
        page_url: &str,
        page_title: &str,
        sentences: &[Sentence],
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.sentences.retain(|s| s.page_url != page_url);
        state.sentences.extend(sentences.iter().map(|s| Sentence {
            page_url: page_url.to_string(),
            page_title: page_title.to_string(),
            ..s.clone()
        }));
        Ok(())
    }

    async fn find_by_keyword(
        &self,
        keyword: &str,
        exclude_page_url: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Sentence>, StoreError> {
        let needle = keyword.to_lowercase();
        Ok(self
            .lock()
            .sentences
            .iter()
            .filter(|s| s.page_url != exclude_page_url && s.text.to_lowercase().contains(&needle))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn page_links_to(&self, page_url: &str, target_url: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .sentences
            .iter()
            .any(|s| s.page_url == page_url && s.outbound_links.contains(target_url)))
    }

    async fn sentences_for_page(&self, page_url: &str) -> Result<Vec<Sentence>, StoreError> {
        Ok(self
            .lock()
            .sentences
            .iter()
            .filter(|s| s.page_url == page_url)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SuggestionStore for MemoryStore {
    async fn upsert_suggestions(&self, suggestions: &[Suggestion]) -> Result<u64, StoreError> {
        let mut keys = HashSet::new();
        if !suggestions.iter().all(|s| keys.insert(s.key())) {
            // Postgres refuses to update the same row twice in one statement batch.
            return Err(StoreError::Unavailable("duplicate key in upsert batch".to_string()));
        }

        let mut state = self.lock();
        for incoming in suggestions {
            match state
                .suggestions
                .iter()
                .position(|s| s.key() == incoming.key())
            {
                Some(i) => {
                    let existing = &mut state.suggestions[i];
                    existing.target_title = incoming.target_title.clone();
                    existing.source_title = incoming.source_title.clone();
                    existing.anchor_text = incoming.anchor_text.clone();
                    existing.anchor_origin = incoming.anchor_origin;
                    existing.context_sentence = incoming.context_sentence.clone();
                    existing.rationale = incoming.rationale.clone();
                }
                None => state.suggestions.push(incoming.clone()),
            }
        }
        Ok(suggestions.len() as u64)
    }

    async fn unverified_suggestions(&self, limit: usize) -> Result<Vec<Suggestion>, StoreError> {
        Ok(self
            .lock()
            .suggestions
            .iter()
            .filter(|s| !s.link_verified)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_link_verified(&self, target_url: &str, source_url: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_write(&state, source_url)?;
        if let Some(s) = state
            .suggestions
            .iter_mut()
            .find(|s| s.key() == (target_url, source_url))
        {
            s.link_verified = true;
        }
        Ok(())
    }

    async fn delete_suggestion(&self, target_url: &str, source_url: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_write(&state, source_url)?;
        state.suggestions.retain(|s| s.key() != (target_url, source_url));
        Ok(())
    }

    async fn suggestions_for_target(&self, target_url: &str) -> Result<Vec<Suggestion>, StoreError> {
        Ok(self
            .lock()
            .suggestions
            .iter()
            .filter(|s| s.target_url == target_url)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// URL-keyed extractor. Unregistered URLs fail with `Status 404`.
/// Pages can be swapped between pipeline steps with `set_page`.
#[derive(Default)]
pub struct MockExtractor {
    pages: Mutex<HashMap<String, Result<ExtractedPage, FetchError>>>,
    fetches: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(self, page: ExtractedPage) -> Self {
        self.set_page(page);
        self
    }

    pub fn on_html(self, url: &str, html: &str) -> Self {
        let url = normalize(url, None);
        let parsed = parse_html(html, &url);
        let plain_text = parsed
            .blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.on_page(ExtractedPage {
            url,
            title: parsed.title,
            plain_text,
            blocks: parsed.blocks,
            outbound_links: parsed.outbound_links,
        })
    }

    pub fn failing(self, url: &str, error: FetchError) -> Self {
        self.fail(url, error);
        self
    }

    pub fn fail(&self, url: &str, error: FetchError) {
        self.pages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(normalize(url, None), Err(error));
    }

    pub fn set_page(&self, page: ExtractedPage) {
        self.pages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(normalize(&page.url, None), Ok(page));
    }

    /// Every URL fetched so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        let url = normalize(url, None);
        self.fetches().iter().filter(|u| **u == url).count()
    }
}

#[async_trait]
impl ContentExtractor for MockExtractor {
    async fn fetch(&self, url: &str) -> Result<ExtractedPage, FetchError> {
        let url = normalize(url, None);
        self.fetches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(url.clone());
        self.pages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&url)
            .cloned()
            .unwrap_or(Err(FetchError::Status { url, status: 404 }))
    }
}

// ---------------------------------------------------------------------------
// Oracles
// ---------------------------------------------------------------------------

/// Returns queued responses in order; fails once the queue is empty.
#[derive(Default)]
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<Result<String, OracleError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_respond(self, response: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Ok(response.into()));
        self
    }

    pub fn then_fail(self, error: OracleError) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Err(error));
        self
    }

    /// User prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl LanguageOracle for ScriptedOracle {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, OracleError> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(user.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Request("no scripted response left".to_string())))
    }
}

/// Deterministic oracle. For keyword prompts it answers with the keywords
/// registered for the page title; for confirmation prompts it accepts every
/// candidate, anchoring on the matched keyword (or the sentence's first
/// three words) with origin `keyword_variation`.
#[derive(Default)]
pub struct EchoOracle {
    keywords: HashMap<String, Vec<String>>,
    rejected_sources: HashSet<String>,
    keyword_calls: AtomicUsize,
    confirm_calls: AtomicUsize,
}

impl EchoOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keywords(mut self, title: &str, keywords: &[&str]) -> Self {
        self.keywords.insert(
            title.to_string(),
            keywords.iter().map(|k| k.to_string()).collect(),
        );
        self
    }

    /// Never accept candidates from this source.
    pub fn rejecting(mut self, source_url: &str) -> Self {
        self.rejected_sources.insert(normalize(source_url, None));
        self
    }

    pub fn keyword_calls(&self) -> usize {
        self.keyword_calls.load(Ordering::SeqCst)
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    fn confirm(&self, request: &serde_json::Value) -> String {
        let accepted: Vec<serde_json::Value> = request["candidates"]
            .as_array()
            .map(|c| c.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|c| {
                let source = c["sourceUrl"].as_str().unwrap_or_default();
                !self.rejected_sources.contains(&normalize(source, None))
            })
            .map(|c| {
                let sentence = c["sentence"].as_str().unwrap_or_default();
                let anchor = c["matchedKeyword"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| sentence.split_whitespace().take(3).collect::<Vec<_>>().join(" "));
                serde_json::json!({
                    "sourceUrl": c["sourceUrl"],
                    "sourceTitle": c["sourceTitle"],
                    "suggestedAnchorText": anchor,
                    "anchorOrigin": "keyword_variation",
                    "context": sentence,
                    "reason": "Sentence discusses the target topic.",
                })
            })
            .collect();
        serde_json::Value::Array(accepted).to_string()
    }
}

#[async_trait]
impl LanguageOracle for EchoOracle {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, OracleError> {
        let request: serde_json::Value = serde_json::from_str(user)
            .map_err(|e| OracleError::Request(format!("unexpected prompt: {e}")))?;

        if request.get("candidates").is_some() {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(self.confirm(&request));
        }

        self.keyword_calls.fetch_add(1, Ordering::SeqCst);
        let title = request["title"].as_str().unwrap_or_default();
        let keywords = self.keywords.get(title).cloned().unwrap_or_default();
        Ok(serde_json::to_string(&keywords).unwrap_or_else(|_| "[]".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A page whose paragraphs are given as `(text, links)` pairs. Each link is
/// `(href, anchor_text)`.
pub fn page(url: &str, title: &str, paragraphs: &[(&str, &[(&str, &str)])]) -> ExtractedPage {
    let url = normalize(url, None);
    let blocks: Vec<ContentBlock> = paragraphs
        .iter()
        .map(|(text, links)| {
            links
                .iter()
                .fold(ContentBlock::text(*text), |block, (href, anchor)| block.with_link(*href, *anchor))
        })
        .collect();
    let outbound_links: BTreeSet<String> = blocks
        .iter()
        .flat_map(|b| b.links.iter())
        .map(|l| normalize(&l.href, Some(&url)))
        .collect();
    ExtractedPage {
        plain_text: blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
        url,
        title: title.to_string(),
        blocks,
        outbound_links,
    }
}

/// A page of plain paragraphs with no links.
pub fn plain_page(url: &str, title: &str, paragraphs: &[&str]) -> ExtractedPage {
    let with_links: Vec<(&str, &[(&str, &str)])> = paragraphs.iter().map(|p| (*p, &[][..])).collect();
    page(url, title, &with_links)
}

/// A pending, unverified suggestion.
pub fn suggestion(target_url: &str, source_url: &str, anchor: &str) -> Suggestion {
    Suggestion {
        target_url: normalize(target_url, None),
        target_title: "Target".to_string(),
        source_url: normalize(source_url, None),
        source_title: "Source".to_string(),
        anchor_text: anchor.to_string(),
        anchor_origin: AnchorOrigin::KeywordVariation,
        context_sentence: format!("A sentence that mentions {anchor} in passing."),
        rationale: "Relevant".to_string(),
        review_status: ReviewStatus::Pending,
        link_verified: false,
    }
}
