//! Candidate retrieval: fragments on other pages that mention one of the
//! target's keywords.
//!
//! Keywords are queried in order and OR-combined. A source page yields at
//! most one candidate (its first matching fragment) and is skipped outright
//! when it is denylisted or already links to the target. The result is
//! capped so the confirmation request stays small.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use linkscout_common::{normalize, Candidate, Sentence, UrlDenylist};

use crate::error::StoreError;
use crate::sentences::SentenceIndex;

/// Result pages read per keyword before giving up on it.
const MAX_PAGES_PER_KEYWORD: usize = 10;

pub struct CandidateRetriever<'a> {
    index: &'a SentenceIndex,
    denylist: &'a UrlDenylist,
    per_keyword_limit: usize,
}

/// Per-call bookkeeping shared across keywords.
struct Selection<'t> {
    target: &'t str,
    max_results: usize,
    candidates: Vec<Candidate>,
    seen: HashSet<String>,
    already_linked: HashMap<String, bool>,
}

impl Selection<'_> {
    fn is_full(&self) -> bool {
        self.candidates.len() >= self.max_results
    }
}

impl<'a> CandidateRetriever<'a> {
    pub fn new(index: &'a SentenceIndex, denylist: &'a UrlDenylist, per_keyword_limit: usize) -> Self {
        Self {
            index,
            denylist,
            per_keyword_limit,
        }
    }

    /// Matches are read in pages of `per_keyword_limit`, so sources that get
    /// skipped (denylisted, already linked, duplicates) do not use up a
    /// keyword's share of the results.
    pub async fn retrieve(
        &self,
        target_url: &str,
        keywords: &[String],
        max_results: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let target = normalize(target_url, None);
        let mut selection = Selection {
            target: &target,
            max_results,
            candidates: Vec::new(),
            seen: HashSet::new(),
            already_linked: HashMap::new(),
        };

        for keyword in keywords.iter().filter(|k| !k.trim().is_empty()) {
            if selection.is_full() || self.per_keyword_limit == 0 {
                break;
            }
            let mut offset = 0;
            for _ in 0..MAX_PAGES_PER_KEYWORD {
                let fragments = self
                    .index
                    .find_by_keyword_from(keyword, &target, self.per_keyword_limit, offset)
                    .await?;
                let exhausted = fragments.len() < self.per_keyword_limit;
                offset += fragments.len();

                for fragment in fragments {
                    if selection.is_full() {
                        break;
                    }
                    self.consider(&mut selection, keywords, fragment).await?;
                }
                if exhausted || selection.is_full() {
                    break;
                }
            }
        }

        debug!(
            target = %target,
            keywords = keywords.len(),
            candidates = selection.candidates.len(),
            "Retrieved candidates"
        );
        Ok(selection.candidates)
    }

    async fn consider(
        &self,
        selection: &mut Selection<'_>,
        keywords: &[String],
        fragment: Sentence,
    ) -> Result<(), StoreError> {
        let target = selection.target;
        let source = normalize(&fragment.page_url, None);
        if source == target || selection.seen.contains(&source) {
            return Ok(());
        }
        if self.denylist.is_excluded(&source) {
            selection.seen.insert(source);
            return Ok(());
        }
        if fragment.outbound_links.contains(target) {
            debug!(source = %source, target = %target, "Fragment already links to target");
            selection.seen.insert(source);
            return Ok(());
        }
        let linked = match selection.already_linked.get(&source) {
            Some(linked) => *linked,
            None => {
                let linked = self.index.page_links_to(&source, target).await?;
                selection.already_linked.insert(source.clone(), linked);
                linked
            }
        };
        if linked {
            debug!(source = %source, target = %target, "Page already links to target");
            selection.seen.insert(source);
            return Ok(());
        }

        let matched_keyword = select_anchor_keyword(keywords, &fragment.text).map(String::from);
        selection.seen.insert(source.clone());
        selection.candidates.push(Candidate {
            source_url: source,
            source_title: fragment.page_title,
            sentence: fragment.text,
            matched_keyword,
        });
        Ok(())
    }
}

/// Longest keyword (by characters) occurring case-insensitively in `text`.
/// Ties keep the earlier keyword.
pub fn select_anchor_keyword<'k>(keywords: &'k [String], text: &str) -> Option<&'k str> {
    let haystack = text.to_lowercase();
    let mut best: Option<&str> = None;
    for keyword in keywords {
        let needle = keyword.trim();
        if needle.is_empty() || !haystack.contains(&needle.to_lowercase()) {
            continue;
        }
        if best.map_or(true, |b| needle.chars().count() > b.chars().count()) {
            best = Some(needle);
        }
    }
    best
}
