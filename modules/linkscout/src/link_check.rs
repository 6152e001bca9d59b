//! Link-existence check: does the source page already link to the target?
//!
//! Two entry points. `screen` runs before persistence (immediate mode):
//! a source that already links is dropped and any row stored for it by an
//! earlier run is deleted. `run_batch`
//! converges stored unverified suggestions (deferred mode): a confirmed
//! existing link deletes the suggestion, anything else marks it verified.
//! An unreachable source is treated as not linked and marked verified.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use linkscout_common::{normalize, Suggestion};

use crate::error::{FetchError, StoreError};
use crate::traits::{ContentExtractor, SuggestionStore};

/// Outcome of probing one source page for one target.
#[derive(Debug, Clone)]
pub enum LinkState {
    Linked,
    NotLinked,
    Unknown(FetchError),
}

/// Counts for one deferred batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCheckSummary {
    pub processed: u32,
    /// Checked and found not linked.
    pub verified: u32,
    /// Already linked; suggestion deleted.
    pub removed: u32,
    /// Source could not be fetched; marked verified anyway.
    pub unreachable: u32,
    /// Store write failed; suggestion left as it was.
    pub failed: u32,
}

impl fmt::Display for LinkCheckSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} verified={} removed={} unreachable={} failed={}",
            self.processed, self.verified, self.removed, self.unreachable, self.failed
        )
    }
}

enum Outcome {
    Removed,
    Verified,
    Unreachable,
}

/// Result of screening freshly confirmed suggestions.
#[derive(Debug, Clone, Default)]
pub struct Screened {
    pub kept: Vec<Suggestion>,
    pub already_linked: usize,
    /// Already linked, but deleting the stored row failed.
    pub failed: usize,
}

pub struct LinkChecker {
    extractor: Arc<dyn ContentExtractor>,
    store: Arc<dyn SuggestionStore>,
    politeness_delay: Duration,
}

impl LinkChecker {
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        store: Arc<dyn SuggestionStore>,
        politeness_delay: Duration,
    ) -> Self {
        Self {
            extractor,
            store,
            politeness_delay,
        }
    }

    pub async fn probe(&self, source_url: &str, target_url: &str) -> LinkState {
        match self.extractor.fetch(source_url).await {
            Ok(page) if page.outbound_links.contains(&normalize(target_url, None)) => {
                LinkState::Linked
            }
            Ok(_) => LinkState::NotLinked,
            Err(e) => LinkState::Unknown(e),
        }
    }

    /// Immediate mode. Sources are fetched one at a time. A source that
    /// cannot be fetched keeps its suggestion unverified for the deferred
    /// batch to retry.
    pub async fn screen(&self, suggestions: Vec<Suggestion>) -> Screened {
        let mut screened = Screened::default();
        for (i, mut suggestion) in suggestions.into_iter().enumerate() {
            if i > 0 {
                self.pause().await;
            }
            match self
                .probe(&suggestion.source_url, &suggestion.target_url)
                .await
            {
                LinkState::Linked => {
                    info!(
                        source = %suggestion.source_url,
                        target = %suggestion.target_url,
                        "Source already links to target, discarding"
                    );
                    screened.already_linked += 1;
                    if let Err(e) = self
                        .store
                        .delete_suggestion(&suggestion.target_url, &suggestion.source_url)
                        .await
                    {
                        warn!(
                            source = %suggestion.source_url,
                            target = %suggestion.target_url,
                            error = %e,
                            "Failed to delete already-linked suggestion"
                        );
                        screened.failed += 1;
                    }
                }
                LinkState::NotLinked => {
                    suggestion.link_verified = true;
                    screened.kept.push(suggestion);
                }
                LinkState::Unknown(e) => {
                    warn!(source = %suggestion.source_url, error = %e, "Link check fetch failed, keeping unverified");
                    screened.kept.push(suggestion);
                }
            }
        }
        screened
    }

    /// Deferred mode. Processes up to `limit` unverified suggestions, oldest
    /// first. Each source page is fetched at most once per batch. Only a
    /// failure to read the work list aborts the batch.
    pub async fn run_batch(&self, limit: usize) -> Result<LinkCheckSummary, StoreError> {
        let pending = self.store.unverified_suggestions(limit).await?;
        let mut summary = LinkCheckSummary::default();
        let mut fetched: HashMap<String, Result<BTreeSet<String>, FetchError>> = HashMap::new();

        info!(count = pending.len(), "Starting link verification batch");

        for suggestion in pending {
            summary.processed += 1;
            let source = normalize(&suggestion.source_url, None);

            if !fetched.contains_key(&source) {
                if !fetched.is_empty() {
                    self.pause().await;
                }
                let links = self
                    .extractor
                    .fetch(&source)
                    .await
                    .map(|page| page.outbound_links);
                fetched.insert(source.clone(), links);
            }

            let (outcome, written) = match fetched.get(&source) {
                Some(Ok(links)) if links.contains(&normalize(&suggestion.target_url, None)) => (
                    Outcome::Removed,
                    self.store
                        .delete_suggestion(&suggestion.target_url, &suggestion.source_url)
                        .await,
                ),
                Some(Ok(_)) => (
                    Outcome::Verified,
                    self.store
                        .mark_link_verified(&suggestion.target_url, &suggestion.source_url)
                        .await,
                ),
                Some(Err(e)) => {
                    warn!(source = %source, error = %e, "Source unreachable, marking verified");
                    (
                        Outcome::Unreachable,
                        self.store
                            .mark_link_verified(&suggestion.target_url, &suggestion.source_url)
                            .await,
                    )
                }
                None => continue,
            };

            match written {
                Ok(()) => match outcome {
                    Outcome::Removed => summary.removed += 1,
                    Outcome::Verified => summary.verified += 1,
                    Outcome::Unreachable => summary.unreachable += 1,
                },
                Err(e) => {
                    warn!(
                        source = %suggestion.source_url,
                        target = %suggestion.target_url,
                        error = %e,
                        "Failed to record link check"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(%summary, "Link verification batch complete");
        Ok(summary)
    }

    async fn pause(&self) {
        if !self.politeness_delay.is_zero() {
            tokio::time::sleep(self.politeness_delay).await;
        }
    }
}
