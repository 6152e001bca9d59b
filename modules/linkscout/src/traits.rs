// Trait seams for the backlink pipeline.
//
// ContentExtractor: fetches a live page (HttpExtractor in production).
// LanguageOracle: text completion for confirmation and keyword generation.
// PageStore / SentenceStore / SuggestionStore: persisted state. PgStore
//   implements all three; testing::MemoryStore is the in-memory double.
//
// Every component receives these explicitly; there is no global client.

use async_trait::async_trait;

use linkscout_common::{ExtractedPage, Page, Sentence, Suggestion};

use crate::error::{FetchError, OracleError, StoreError};

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Fetch a page and return its title, text blocks and canonical outbound links.
    async fn fetch(&self, url: &str) -> Result<ExtractedPage, FetchError>;
}

#[async_trait]
pub trait LanguageOracle: Send + Sync {
    /// Run one completion. The response is raw text; decoding is the caller's job.
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageStore: Send + Sync {
    async fn get_page(&self, url: &str) -> Result<Option<Page>, StoreError>;

    /// Insert a page or refresh its title, content and `indexed_at`.
    /// Cached keywords are left untouched.
    async fn upsert_page(&self, url: &str, title: &str, content: &str) -> Result<(), StoreError>;

    async fn set_keywords(&self, url: &str, keywords: &[String]) -> Result<(), StoreError>;

    /// Forget generated keywords. Returns false when the page is unknown.
    async fn clear_keywords(&self, url: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SentenceStore: Send + Sync {
    /// Atomically replace every stored fragment of `page_url`.
    async fn replace_sentences(
        &self,
        page_url: &str,
        page_title: &str,
        sentences: &[Sentence],
    ) -> Result<(), StoreError>;

    /// Case-insensitive substring search over fragment text, in insertion
    /// order. `offset` skips that many matches.
    async fn find_by_keyword(
        &self,
        keyword: &str,
        exclude_page_url: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Sentence>, StoreError>;

    /// Whether any stored fragment of `page_url` links to `target_url`.
    async fn page_links_to(&self, page_url: &str, target_url: &str) -> Result<bool, StoreError>;

    async fn sentences_for_page(&self, page_url: &str) -> Result<Vec<Sentence>, StoreError>;
}

#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Upsert keyed by `(target_url, source_url)`. On conflict only content
    /// fields change; `review_status` and `link_verified` keep their stored
    /// values. The input must not repeat a key. Returns rows written.
    async fn upsert_suggestions(&self, suggestions: &[Suggestion]) -> Result<u64, StoreError>;

    /// Unverified suggestions, oldest first.
    async fn unverified_suggestions(&self, limit: usize) -> Result<Vec<Suggestion>, StoreError>;

    async fn mark_link_verified(&self, target_url: &str, source_url: &str)
        -> Result<(), StoreError>;

    async fn delete_suggestion(&self, target_url: &str, source_url: &str) -> Result<(), StoreError>;

    async fn suggestions_for_target(&self, target_url: &str) -> Result<Vec<Suggestion>, StoreError>;
}
