//! Sentence store: per-page decomposition of extracted text into filtered
//! fragments tagged with the canonical links embedded in each.
//!
//! Raw page text is dominated by navigation and chrome. The filter prefers
//! dropping a usable sentence over indexing navigation junk as one:
//!
//! - at least `MIN_FRAGMENT_WORDS` words and `MIN_FRAGMENT_CHARS` characters
//! - at most `MAX_CAPITALIZED_RATIO` of words capitalized (link lists, menus)
//! - no `|` (breadcrumbs, title separators)
//! - no boilerplate phrase (built-in list plus the site name)
//!
//! The same policy applies to sentences and headings.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use linkscout_common::{normalize, try_normalize, ContentBlock, Sentence};

use crate::error::StoreError;
use crate::traits::SentenceStore;

pub const MIN_FRAGMENT_WORDS: usize = 8;
pub const MIN_FRAGMENT_CHARS: usize = 40;
pub const MAX_CAPITALIZED_RATIO: f64 = 0.4;

pub const BOILERPLATE_PHRASES: &[&str] = &[
    "skip to content",
    "skip to main content",
    "all rights reserved",
    "we use cookies",
    "this website uses cookies",
    "accept cookies",
    "subscribe to our newsletter",
    "sign up for our newsletter",
    "leave a comment",
    "leave a reply",
    "your email address will not be published",
    "posted in",
    "filed under",
    "read more",
    "click here",
    "share this",
    "powered by",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    Capitalized,
    Pipe,
    Boilerplate,
}

#[derive(Debug, Clone)]
pub struct FragmentFilter {
    phrases: Vec<String>,
}

impl FragmentFilter {
    /// Built-in boilerplate phrases, plus `site_name` when given.
    pub fn new(site_name: Option<&str>) -> Self {
        let mut phrases: Vec<String> = BOILERPLATE_PHRASES.iter().map(|p| p.to_string()).collect();
        if let Some(name) = site_name.map(|n| n.trim().to_lowercase()) {
            if !name.is_empty() {
                phrases.push(name);
            }
        }
        Self { phrases }
    }

    pub fn check(&self, fragment: &str) -> Result<(), Rejection> {
        let words: Vec<&str> = fragment.split_whitespace().collect();
        if words.len() < MIN_FRAGMENT_WORDS || fragment.chars().count() < MIN_FRAGMENT_CHARS {
            return Err(Rejection::TooShort);
        }
        if fragment.contains('|') {
            return Err(Rejection::Pipe);
        }

        let alphabetic: Vec<&&str> = words
            .iter()
            .filter(|w| w.chars().any(char::is_alphabetic))
            .collect();
        if !alphabetic.is_empty() {
            let capitalized = alphabetic
                .iter()
                .filter(|w| {
                    w.chars()
                        .find(|c| c.is_alphabetic())
                        .is_some_and(char::is_uppercase)
                })
                .count();
            if capitalized as f64 / alphabetic.len() as f64 > MAX_CAPITALIZED_RATIO {
                return Err(Rejection::Capitalized);
            }
        }

        let lower = fragment.to_lowercase();
        if self.phrases.iter().any(|p| lower.contains(p.as_str())) {
            return Err(Rejection::Boilerplate);
        }

        Ok(())
    }

    pub fn accepts(&self, fragment: &str) -> bool {
        self.check(fragment).is_ok()
    }
}

impl Default for FragmentFilter {
    fn default() -> Self {
        Self::new(None)
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on sentence-ending punctuation followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = collapse_whitespace(text);
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    push_trimmed(&mut out, &text[start..end]);
                    start = end;
                }
            }
        }
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

/// Decompose blocks into filtered fragments.
///
/// A link is attached to the fragments of its block that contain its anchor
/// text; a link whose anchor matches none of them is attached to every
/// fragment of the block. Fragments repeated on one page are merged.
pub fn segment_blocks(
    page_url: &str,
    page_title: &str,
    blocks: &[ContentBlock],
    filter: &FragmentFilter,
) -> Vec<Sentence> {
    let mut out: Vec<Sentence> = Vec::new();

    for block in blocks {
        let parts = split_sentences(&block.text);
        if parts.is_empty() {
            continue;
        }
        let lowered: Vec<String> = parts.iter().map(|p| p.to_lowercase()).collect();
        let mut links: Vec<BTreeSet<String>> = vec![BTreeSet::new(); parts.len()];

        for link in &block.links {
            let Some(target) = try_normalize(&link.href, Some(page_url)) else {
                continue;
            };
            let anchor = collapse_whitespace(&link.anchor_text).to_lowercase();
            let hits: Vec<usize> = if anchor.is_empty() {
                Vec::new()
            } else {
                lowered
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.contains(anchor.as_str()))
                    .map(|(i, _)| i)
                    .collect()
            };
            if hits.is_empty() {
                links.iter_mut().for_each(|set| {
                    set.insert(target.clone());
                });
            } else {
                for i in hits {
                    links[i].insert(target.clone());
                }
            }
        }

        for (text, links) in parts.into_iter().zip(links) {
            if !filter.accepts(&text) {
                continue;
            }
            match out.iter_mut().find(|s| s.text == text) {
                Some(existing) => existing.outbound_links.extend(links),
                None => out.push(Sentence {
                    page_url: page_url.to_string(),
                    page_title: page_title.to_string(),
                    text,
                    outbound_links: links,
                }),
            }
        }
    }

    out
}

/// Sentence index over a `SentenceStore`.
#[derive(Clone)]
pub struct SentenceIndex {
    store: Arc<dyn SentenceStore>,
    filter: FragmentFilter,
}

impl SentenceIndex {
    pub fn new(store: Arc<dyn SentenceStore>, filter: FragmentFilter) -> Self {
        Self { store, filter }
    }

    /// Replace every fragment of the page with a fresh decomposition of
    /// `blocks`. Repeating the call with the same input is a no-op.
    pub async fn reindex(
        &self,
        page_url: &str,
        page_title: &str,
        blocks: &[ContentBlock],
    ) -> Result<usize, StoreError> {
        let page_url = normalize(page_url, None);
        let sentences = segment_blocks(&page_url, page_title, blocks, &self.filter);
        self.store
            .replace_sentences(&page_url, page_title, &sentences)
            .await?;
        debug!(url = %page_url, blocks = blocks.len(), fragments = sentences.len(), "Reindexed page");
        Ok(sentences.len())
    }

    pub async fn find_by_keyword(
        &self,
        keyword: &str,
        exclude_page_url: &str,
        limit: usize,
    ) -> Result<Vec<Sentence>, StoreError> {
        self.find_by_keyword_from(keyword, exclude_page_url, limit, 0)
            .await
    }

    /// One page of `find_by_keyword` results, skipping the first `offset`.
    pub async fn find_by_keyword_from(
        &self,
        keyword: &str,
        exclude_page_url: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Sentence>, StoreError> {
        let keyword = keyword.trim();
        if keyword.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.store
            .find_by_keyword(keyword, &normalize(exclude_page_url, None), limit, offset)
            .await
    }

    pub async fn page_links_to(&self, page_url: &str, target_url: &str) -> Result<bool, StoreError> {
        self.store
            .page_links_to(&normalize(page_url, None), &normalize(target_url, None))
            .await
    }
}
