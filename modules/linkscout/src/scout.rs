use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use typed_builder::TypedBuilder;

use linkscout_common::{
    normalize, BatchSummary, Config, LinkCheckMode, Page, Suggestion, UrlDenylist,
};

use crate::confirmer::SuggestionConfirmer;
use crate::error::{LinkScoutError, Result, StoreError};
use crate::keywords::KeywordGenerator;
use crate::link_check::{LinkCheckSummary, LinkChecker};
use crate::oracle::truncate_to_char_boundary;
use crate::persister::SuggestionPersister;
use crate::retriever::CandidateRetriever;
use crate::sentences::{FragmentFilter, SentenceIndex};
use crate::traits::{ContentExtractor, LanguageOracle, PageStore, SentenceStore, SuggestionStore};

const DEFAULT_SUMMARY_BYTES: usize = 1_500;

/// Secret-free pipeline settings.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineConfig {
    #[builder(default = 20)]
    pub max_candidates: usize,
    #[builder(default = 50)]
    pub per_keyword_limit: usize,
    #[builder(default)]
    pub link_check_mode: LinkCheckMode,
    #[builder(default = 25)]
    pub link_check_batch: usize,
    #[builder(default = Duration::from_millis(1000))]
    pub politeness_delay: Duration,
    #[builder(default)]
    pub denylist: UrlDenylist,
    #[builder(default)]
    pub fragment_filter: FragmentFilter,
    /// Target content sent to the oracle, in bytes.
    #[builder(default = DEFAULT_SUMMARY_BYTES)]
    pub summary_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let denylist = config
            .exclude_url_patterns
            .as_deref()
            .map(UrlDenylist::from_csv)
            .unwrap_or_default();
        Self::builder()
            .max_candidates(config.max_candidates)
            .per_keyword_limit(config.per_keyword_limit)
            .link_check_mode(config.link_check_mode)
            .link_check_batch(config.link_check_batch)
            .politeness_delay(Duration::from_millis(config.politeness_delay_ms))
            .denylist(denylist)
            .fragment_filter(FragmentFilter::new(config.site_name.as_deref()))
            .build()
    }
}

/// Outcome of analyzing one target page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub target_url: String,
    pub keywords: Vec<String>,
    pub keywords_cached: bool,
    pub candidates: usize,
    pub confirmed: usize,
    /// Dropped by the immediate link check.
    pub already_linked: usize,
    /// Already linked, but the stored row could not be deleted.
    pub link_check_failed: usize,
    pub persisted: u64,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Analysis: {} ===", self.target_url)?;
        writeln!(
            f,
            "Keywords:        {}{}",
            self.keywords.len(),
            if self.keywords_cached { " (cached)" } else { "" }
        )?;
        writeln!(f, "Candidates:      {}", self.candidates)?;
        writeln!(f, "Confirmed:       {}", self.confirmed)?;
        writeln!(f, "Already linked:  {}", self.already_linked)?;
        if self.link_check_failed > 0 {
            writeln!(f, "Delete failed:   {}", self.link_check_failed)?;
        }
        write!(f, "Saved:           {}", self.persisted)
    }
}

/// The backlink pipeline: index pages, analyze targets, converge link checks.
pub struct LinkScout {
    pages: Arc<dyn PageStore>,
    index: SentenceIndex,
    suggestions: Arc<dyn SuggestionStore>,
    extractor: Arc<dyn ContentExtractor>,
    keywords: KeywordGenerator,
    confirmer: SuggestionConfirmer,
    persister: SuggestionPersister,
    link_checker: LinkChecker,
    config: PipelineConfig,
}

impl LinkScout {
    /// Build over a single store implementing every store trait.
    pub fn new<S>(
        store: Arc<S>,
        extractor: Arc<dyn ContentExtractor>,
        oracle: Arc<dyn LanguageOracle>,
        config: PipelineConfig,
    ) -> Self
    where
        S: PageStore + SentenceStore + SuggestionStore + 'static,
    {
        Self::from_parts(store.clone(), store.clone(), store, extractor, oracle, config)
    }

    pub fn from_parts(
        pages: Arc<dyn PageStore>,
        sentences: Arc<dyn SentenceStore>,
        suggestions: Arc<dyn SuggestionStore>,
        extractor: Arc<dyn ContentExtractor>,
        oracle: Arc<dyn LanguageOracle>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            index: SentenceIndex::new(sentences, config.fragment_filter.clone()),
            keywords: KeywordGenerator::new(oracle.clone()),
            confirmer: SuggestionConfirmer::new(oracle),
            persister: SuggestionPersister::new(suggestions.clone()),
            link_checker: LinkChecker::new(
                extractor.clone(),
                suggestions.clone(),
                config.politeness_delay,
            ),
            pages,
            suggestions,
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch one page, store its record and rebuild its fragments.
    /// Returns the number of fragments stored.
    pub async fn index_page(&self, url: &str) -> Result<usize> {
        let url = normalize(url, None);
        let page = self.extractor.fetch(&url).await?;
        let title = if page.title.trim().is_empty() {
            url.clone()
        } else {
            page.title.trim().to_string()
        };

        self.pages.upsert_page(&url, &title, &page.plain_text).await?;
        let fragments = self.index.reindex(&url, &title, &page.blocks).await?;
        info!(url = %url, fragments, links = page.outbound_links.len(), "Indexed page");
        Ok(fragments)
    }

    /// Index pages one at a time. A failing page is counted and skipped.
    pub async fn index_pages(&self, urls: &[String]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !self.config.politeness_delay.is_zero() {
                tokio::time::sleep(self.config.politeness_delay).await;
            }
            match self.index_page(url).await {
                Ok(_) => summary.record_success(),
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to index page");
                    summary.record_failure();
                }
            }
        }
        info!(%summary, "Indexing batch complete");
        summary
    }

    /// Find, confirm and store backlink suggestions for one target page.
    pub async fn analyze_target(&self, target_url: &str) -> Result<AnalysisReport> {
        let target = normalize(target_url, None);
        let page = self.load_or_index(&target).await?;

        let mut report = AnalysisReport {
            target_url: target.clone(),
            keywords_cached: page.has_keywords(),
            ..Default::default()
        };
        report.keywords = self.ensure_keywords(&page).await?;
        if report.keywords.is_empty() {
            info!(target = %target, "No keywords for target, nothing to retrieve");
            return Ok(report);
        }

        let retriever = CandidateRetriever::new(
            &self.index,
            &self.config.denylist,
            self.config.per_keyword_limit,
        );
        let candidates = retriever
            .retrieve(&target, &report.keywords, self.config.max_candidates)
            .await?;
        report.candidates = candidates.len();
        if candidates.is_empty() {
            info!(target = %target, "No candidates found");
            return Ok(report);
        }

        let summary = target_summary(&page.content, self.config.summary_bytes);
        let confirmed = self
            .confirmer
            .confirm(&target, &page.title, &summary, &candidates)
            .await?;
        report.confirmed = confirmed.len();

        let to_store = match self.config.link_check_mode {
            LinkCheckMode::Immediate => {
                let screened = self.link_checker.screen(confirmed).await;
                report.already_linked = screened.already_linked;
                report.link_check_failed = screened.failed;
                screened.kept
            }
            LinkCheckMode::Deferred => confirmed,
        };

        report.persisted = self.persister.upsert(&target, &page.title, to_store).await?;
        info!(
            target = %target,
            keywords = report.keywords.len(),
            candidates = report.candidates,
            confirmed = report.confirmed,
            already_linked = report.already_linked,
            link_check_failed = report.link_check_failed,
            persisted = report.persisted,
            "Analysis complete"
        );
        Ok(report)
    }

    /// Run one deferred link-check batch. `limit` defaults to the
    /// configured batch size.
    pub async fn verify_links(&self, limit: Option<usize>) -> Result<LinkCheckSummary> {
        let limit = limit.unwrap_or(self.config.link_check_batch);
        Ok(self.link_checker.run_batch(limit).await?)
    }

    /// Drop cached keywords so the next analysis regenerates them.
    pub async fn clear_keywords(&self, url: &str) -> Result<bool> {
        let url = normalize(url, None);
        let cleared = self.pages.clear_keywords(&url).await?;
        if cleared {
            info!(url = %url, "Cleared cached keywords");
        }
        Ok(cleared)
    }

    pub async fn suggestions_for_target(&self, url: &str) -> Result<Vec<Suggestion>> {
        Ok(self
            .suggestions
            .suggestions_for_target(&normalize(url, None))
            .await?)
    }

    async fn load_or_index(&self, target: &str) -> Result<Page> {
        if let Some(page) = self.pages.get_page(target).await? {
            return Ok(page);
        }
        info!(target, "Target not indexed yet, indexing first");
        self.index_page(target).await?;
        self.pages.get_page(target).await?.ok_or_else(|| {
            LinkScoutError::Store(StoreError::Corrupt(format!(
                "page {target} missing right after indexing"
            )))
        })
    }

    async fn ensure_keywords(&self, page: &Page) -> Result<Vec<String>> {
        if page.has_keywords() {
            return Ok(page.keywords.clone());
        }
        let keywords = self.keywords.generate(&page.title, &page.content).await?;
        self.pages.set_keywords(&page.url, &keywords).await?;
        Ok(keywords)
    }
}

/// Whitespace-collapsed prefix of the page content.
fn target_summary(content: &str, max_bytes: usize) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_to_char_boundary(&collapsed, max_bytes).to_string()
}
