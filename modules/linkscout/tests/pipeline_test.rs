//! End-to-end pipeline runs on the in-memory doubles: index sources,
//! analyze a target, converge link checks.

use std::sync::Arc;
use std::time::Duration;

use linkscout::error::{FetchError, LinkScoutError, OracleError};
use linkscout::testing::{page, plain_page, suggestion, EchoOracle, MemoryStore, MockExtractor, ScriptedOracle};
use linkscout::traits::{LanguageOracle, SentenceStore, SuggestionStore};
use linkscout::{LinkScout, PipelineConfig};
use linkscout_common::{AnchorOrigin, ExtractedPage, LinkCheckMode, ReviewStatus, Suggestion};

const TARGET: &str = "https://example.com/weight-loss-lipedema";
const TARGET_TITLE: &str = "Weight Loss with Lipedema";
const SOURCE: &str = "https://example.com/blog/lipedema-faq";
const OTHER_SOURCE: &str = "https://example.com/blog/compression";

const NO_LINKS: &[(&str, &str)] = &[];

const KEYWORD: &str = "weight loss with lipedema";
const SOURCE_SENTENCE: &str = "Many patients ask about weight loss with lipedema management options.";

fn target_page() -> ExtractedPage {
    plain_page(
        TARGET,
        TARGET_TITLE,
        &["Weight loss with lipedema requires a different approach than ordinary dieting plans for most people."],
    )
}

fn source_page(links_to_target: bool) -> ExtractedPage {
    let links: &[(&str, &str)] = if links_to_target {
        &[(TARGET, "guide to weight loss")]
    } else {
        NO_LINKS
    };
    page(
        SOURCE,
        "Lipedema FAQ",
        &[
            (SOURCE_SENTENCE, NO_LINKS),
            ("Our complete guide to weight loss explains every treatment option in plain language.", links),
        ],
    )
}

fn other_source_page() -> ExtractedPage {
    plain_page(
        OTHER_SOURCE,
        "Compression Basics",
        &["Compression garments are often combined with weight loss with lipedema programs at home."],
    )
}

struct Harness {
    store: Arc<MemoryStore>,
    extractor: Arc<MockExtractor>,
    scout: LinkScout,
}

fn harness(extractor: MockExtractor, oracle: Arc<dyn LanguageOracle>, mode: LinkCheckMode) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(extractor);
    let config = PipelineConfig::builder()
        .link_check_mode(mode)
        .politeness_delay(Duration::ZERO)
        .build();
    let scout = LinkScout::new(store.clone(), extractor.clone(), oracle, config);
    Harness {
        store,
        extractor,
        scout,
    }
}

fn echo() -> Arc<EchoOracle> {
    Arc::new(EchoOracle::new().with_keywords(TARGET_TITLE, &[KEYWORD]))
}

fn assert_well_formed(s: &Suggestion) {
    assert!(
        s.context_sentence
            .to_lowercase()
            .contains(&s.anchor_text.to_lowercase()),
        "anchor {:?} not in context {:?}",
        s.anchor_text,
        s.context_sentence
    );
    assert!(matches!(
        s.anchor_origin,
        AnchorOrigin::Title | AnchorOrigin::KeywordVariation
    ));
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unlinked_source_yields_pending_suggestion() {
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);

    let indexed = h.scout.index_pages(&[SOURCE.to_string()]).await;
    assert_eq!(indexed.succeeded, 1);

    let report = h.scout.analyze_target(TARGET).await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.persisted, 1);

    let stored = h.scout.suggestions_for_target(TARGET).await.unwrap();
    assert_eq!(stored.len(), 1);
    let s = &stored[0];
    assert_eq!(s.source_url, SOURCE);
    assert_eq!(s.target_title, TARGET_TITLE);
    assert!(s.anchor_text.to_lowercase().contains(KEYWORD));
    assert_eq!(s.context_sentence, SOURCE_SENTENCE);
    assert_eq!(s.review_status, ReviewStatus::Pending);
    assert!(!s.link_verified);
    assert_well_formed(s);
}

#[tokio::test]
async fn sentence_after_nested_block_is_indexed_and_suggested() {
    let sentence = "Many patients ask about weight loss with lipedema and this guide explains it.";
    let html = r#"<html><head><title>Lipedema FAQ</title></head><body>
        <nav><a href="/">Home</a></nav>
        <ul><li>Compression helps many people. <p>Short aside here.</p>
        Many patients ask about weight loss with lipedema and <a href="/blog/guide">this guide</a> explains it.</li></ul>
        </body></html>"#;
    let extractor = MockExtractor::new().on_page(target_page()).on_html(SOURCE, html);
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);

    h.scout.index_pages(&[SOURCE.to_string()]).await;
    let report = h.scout.analyze_target(TARGET).await.unwrap();

    assert_eq!(report.candidates, 1);
    let stored = h.store.suggestion(TARGET, SOURCE).unwrap();
    assert_eq!(stored.source_title, "Lipedema FAQ");
    assert_eq!(stored.context_sentence, sentence);
    assert_well_formed(&stored);
}

#[tokio::test]
async fn already_linked_source_yields_nothing() {
    let oracle = echo();
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(true));
    let h = harness(extractor, oracle.clone(), LinkCheckMode::Deferred);

    h.scout.index_pages(&[SOURCE.to_string()]).await;
    let report = h.scout.analyze_target(TARGET).await.unwrap();

    assert_eq!(report.candidates, 0);
    assert_eq!(oracle.confirm_calls(), 0);
    assert!(h.scout.suggestions_for_target(TARGET).await.unwrap().is_empty());
}

#[tokio::test]
async fn immediate_check_discards_source_that_linked_after_indexing() {
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Immediate);
    h.scout.index_pages(&[SOURCE.to_string()]).await;

    // The live page gained the link; the stored fragments have not seen it.
    h.extractor.set_page(source_page(true));
    let report = h.scout.analyze_target(TARGET).await.unwrap();

    assert_eq!(report.confirmed, 1);
    assert_eq!(report.already_linked, 1);
    assert_eq!(report.persisted, 0);
    assert!(h.store.suggestions().is_empty());
}

#[tokio::test]
async fn immediate_check_stores_verified_when_not_linked() {
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Immediate);
    h.scout.index_pages(&[SOURCE.to_string()]).await;

    h.scout.analyze_target(TARGET).await.unwrap();

    let stored = h.store.suggestion(TARGET, SOURCE).unwrap();
    assert!(stored.link_verified);
}

#[tokio::test]
async fn immediate_reanalysis_deletes_row_once_source_links() {
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Immediate);
    h.scout.index_pages(&[SOURCE.to_string()]).await;
    h.scout.analyze_target(TARGET).await.unwrap();
    assert!(h.store.suggestion(TARGET, SOURCE).unwrap().link_verified);

    // The live page gained the link after the first run stored a verified row.
    h.extractor.set_page(source_page(true));
    let report = h.scout.analyze_target(TARGET).await.unwrap();

    assert_eq!(report.already_linked, 1);
    assert_eq!(report.persisted, 0);
    assert!(h.store.suggestion(TARGET, SOURCE).is_none());
    let summary = h.scout.verify_links(None).await.unwrap();
    assert_eq!(summary.processed, 0);
}

#[tokio::test]
async fn immediate_check_counts_failed_delete_of_linked_row() {
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Immediate);
    h.scout.index_pages(&[SOURCE.to_string()]).await;
    h.scout.analyze_target(TARGET).await.unwrap();

    h.extractor.set_page(source_page(true));
    h.store.fail_writes_for(SOURCE);
    let report = h.scout.analyze_target(TARGET).await.unwrap();

    assert_eq!(report.already_linked, 1);
    assert_eq!(report.link_check_failed, 1);
    assert!(h.store.suggestion(TARGET, SOURCE).is_some());
}

#[tokio::test]
async fn immediate_check_keeps_unverified_when_source_unreachable() {
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Immediate);
    h.scout.index_pages(&[SOURCE.to_string()]).await;

    h.extractor.fail(
        SOURCE,
        FetchError::Timeout {
            url: SOURCE.to_string(),
        },
    );
    h.scout.analyze_target(TARGET).await.unwrap();

    let stored = h.store.suggestion(TARGET, SOURCE).unwrap();
    assert!(!stored.link_verified);
}

#[tokio::test]
async fn deferred_check_verifies_unlinked_source() {
    let extractor = MockExtractor::new().on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.store
        .upsert_suggestions(&[suggestion(TARGET, SOURCE, KEYWORD)])
        .await
        .unwrap();
    h.store.set_review_status(TARGET, SOURCE, ReviewStatus::Accepted);

    let summary = h.scout.verify_links(None).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.verified, 1);

    let stored = h.store.suggestion(TARGET, SOURCE).unwrap();
    assert!(stored.link_verified);
    assert_eq!(stored.review_status, ReviewStatus::Accepted);
}

#[tokio::test]
async fn deferred_check_fails_open_on_timeout() {
    let extractor = MockExtractor::new().failing(
        SOURCE,
        FetchError::Timeout {
            url: SOURCE.to_string(),
        },
    );
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.store
        .upsert_suggestions(&[suggestion(TARGET, SOURCE, KEYWORD)])
        .await
        .unwrap();

    let summary = h.scout.verify_links(None).await.unwrap();
    assert_eq!(summary.unreachable, 1);
    assert_eq!(summary.failed, 0);

    let stored = h.store.suggestion(TARGET, SOURCE).unwrap();
    assert!(stored.link_verified);
}

#[tokio::test]
async fn repeated_analysis_keeps_one_row_per_pair() {
    let oracle = echo();
    let extractor = MockExtractor::new()
        .on_page(target_page())
        .on_page(source_page(false))
        .on_page(other_source_page());
    let h = harness(extractor, oracle.clone(), LinkCheckMode::Deferred);
    h.scout
        .index_pages(&[SOURCE.to_string(), OTHER_SOURCE.to_string()])
        .await;

    let first = h.scout.analyze_target(TARGET).await.unwrap();
    let second = h.scout.analyze_target(TARGET).await.unwrap();
    assert_eq!(first.persisted, 2);
    assert_eq!(second.persisted, 2);
    assert!(second.keywords_cached);
    assert_eq!(oracle.keyword_calls(), 1);

    let stored = h.store.suggestions();
    assert_eq!(stored.len(), 2);
    let mut sources: Vec<_> = stored.iter().map(|s| s.source_url.as_str()).collect();
    sources.sort_unstable();
    assert_eq!(sources, vec![OTHER_SOURCE, SOURCE]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deferred_check_deletes_already_linked_suggestion() {
    let extractor = MockExtractor::new().on_page(source_page(true));
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.store
        .upsert_suggestions(&[suggestion(TARGET, SOURCE, KEYWORD)])
        .await
        .unwrap();

    let summary = h.scout.verify_links(None).await.unwrap();
    assert_eq!(summary.removed, 1);
    assert!(h.store.suggestion(TARGET, SOURCE).is_none());
}

#[tokio::test]
async fn reanalysis_preserves_review_state() {
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.scout.index_pages(&[SOURCE.to_string()]).await;

    h.scout.analyze_target(TARGET).await.unwrap();
    h.store.set_review_status(TARGET, SOURCE, ReviewStatus::Dismissed);
    h.scout.verify_links(None).await.unwrap();

    h.scout.analyze_target(TARGET).await.unwrap();

    let stored = h.store.suggestion(TARGET, SOURCE).unwrap();
    assert_eq!(stored.review_status, ReviewStatus::Dismissed);
    assert!(stored.link_verified);
    assert_eq!(h.store.suggestions().len(), 1);
}

#[tokio::test]
async fn one_candidate_per_source_and_never_the_target() {
    let oracle = Arc::new(
        EchoOracle::new().with_keywords(TARGET_TITLE, &[KEYWORD, "weight loss", "lipedema"]),
    );
    let extractor = MockExtractor::new().on_page(target_page()).on_page(page(
        SOURCE,
        "Lipedema FAQ",
        &[
            (SOURCE_SENTENCE, NO_LINKS),
            ("Doctors rarely discuss weight loss with lipedema during the first visit.", NO_LINKS),
            ("Keeping a food diary helps track lipedema symptoms over several weeks.", NO_LINKS),
        ],
    ));
    let h = harness(extractor, oracle, LinkCheckMode::Deferred);
    h.scout.index_pages(&[SOURCE.to_string()]).await;

    let report = h.scout.analyze_target(TARGET).await.unwrap();
    assert_eq!(report.candidates, 1);

    let stored = h.store.suggestions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].context_sentence, SOURCE_SENTENCE);
    assert!(stored.iter().all(|s| s.source_url != TARGET));
}

#[tokio::test]
async fn denylisted_sources_are_skipped() {
    let tag_page = plain_page(
        "https://example.com/tag/lipedema",
        "Lipedema Archives",
        &["Everything we wrote about weight loss with lipedema collected on one page."],
    );
    let extractor = MockExtractor::new().on_page(target_page()).on_page(tag_page);
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.scout
        .index_pages(&["https://example.com/tag/lipedema".to_string()])
        .await;

    let report = h.scout.analyze_target(TARGET).await.unwrap();
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn deferred_batch_fetches_each_source_once() {
    let extractor = MockExtractor::new().on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.store
        .upsert_suggestions(&[
            suggestion(TARGET, SOURCE, KEYWORD),
            suggestion("https://example.com/compression-garments", SOURCE, "compression"),
        ])
        .await
        .unwrap();

    let summary = h.scout.verify_links(None).await.unwrap();
    assert_eq!(summary.verified, 2);
    assert_eq!(h.extractor.fetch_count(SOURCE), 1);
}

#[tokio::test]
async fn deferred_batch_counts_write_failures_and_continues() {
    let extractor = MockExtractor::new()
        .on_page(source_page(false))
        .on_page(other_source_page());
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.store
        .upsert_suggestions(&[
            suggestion(TARGET, SOURCE, KEYWORD),
            suggestion(TARGET, OTHER_SOURCE, KEYWORD),
        ])
        .await
        .unwrap();
    h.store.fail_writes_for(SOURCE);

    let summary = h.scout.verify_links(None).await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.verified, 1);
    assert!(!h.store.suggestion(TARGET, SOURCE).unwrap().link_verified);
    assert!(h.store.suggestion(TARGET, OTHER_SOURCE).unwrap().link_verified);
}

#[tokio::test]
async fn verify_limit_processes_oldest_first() {
    let extractor = MockExtractor::new()
        .on_page(source_page(false))
        .on_page(other_source_page());
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);
    h.store
        .upsert_suggestions(&[
            suggestion(TARGET, SOURCE, KEYWORD),
            suggestion(TARGET, OTHER_SOURCE, KEYWORD),
        ])
        .await
        .unwrap();

    let summary = h.scout.verify_links(Some(1)).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert!(h.store.suggestion(TARGET, SOURCE).unwrap().link_verified);
    assert!(!h.store.suggestion(TARGET, OTHER_SOURCE).unwrap().link_verified);
}

#[tokio::test]
async fn index_batch_counts_failures_per_page() {
    let extractor = MockExtractor::new().on_page(source_page(false));
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);

    let summary = h
        .scout
        .index_pages(&[SOURCE.to_string(), "https://example.com/missing".to_string()])
        .await;
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let extractor = MockExtractor::new().on_page(source_page(true));
    let h = harness(extractor, echo(), LinkCheckMode::Deferred);

    h.scout.index_page(SOURCE).await.unwrap();
    let once = h.store.sentences_for_page(SOURCE).await.unwrap();
    h.scout.index_page(SOURCE).await.unwrap();
    let twice = h.store.sentences_for_page(SOURCE).await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(h.store.sentence_count(), once.len());
    assert!(h.store.page_links_to(SOURCE, TARGET).await.unwrap());
}

#[tokio::test]
async fn clearing_keywords_forces_regeneration() {
    let oracle = echo();
    let extractor = MockExtractor::new().on_page(target_page());
    let h = harness(extractor, oracle.clone(), LinkCheckMode::Deferred);

    h.scout.analyze_target(TARGET).await.unwrap();
    assert!(h.scout.clear_keywords(TARGET).await.unwrap());
    h.scout.analyze_target(TARGET).await.unwrap();

    assert_eq!(oracle.keyword_calls(), 2);
    assert!(!h.scout.clear_keywords("https://example.com/never-indexed").await.unwrap());
}

#[tokio::test]
async fn unreachable_target_aborts_analysis() {
    let h = harness(MockExtractor::new(), echo(), LinkCheckMode::Deferred);
    let err = h.scout.analyze_target(TARGET).await.unwrap_err();
    assert!(matches!(err, LinkScoutError::Fetch(FetchError::Status { status: 404, .. })));
}

#[tokio::test]
async fn malformed_confirmation_aborts_run_without_writes() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .then_respond(format!("[\"{KEYWORD}\"]"))
            .then_respond("I'm sorry, none of these candidates look relevant."),
    );
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, oracle, LinkCheckMode::Deferred);
    h.scout.index_pages(&[SOURCE.to_string()]).await;

    let err = h.scout.analyze_target(TARGET).await.unwrap_err();
    assert!(matches!(err, LinkScoutError::Oracle(OracleError::Malformed { .. })));
    assert!(h.store.suggestions().is_empty());
}

#[tokio::test]
async fn noisy_oracle_responses_are_salvaged() {
    let confirmation = format!(
        "Here is my assessment:\n```json\n[{{\"sourceUrl\": \"{SOURCE}\", \"sourceTitle\": \"Lipedema FAQ\", \
         \"suggestedAnchorText\": \"Weight Loss with Lipedema\", \"anchorOrigin\": \"title\", \
         \"context\": \"{SOURCE_SENTENCE}\", \"reason\": \"Directly discusses the topic.\"}}]\n```\nHope this helps!"
    );
    let oracle = Arc::new(
        ScriptedOracle::new()
            .then_respond(format!("Keywords: [\"{KEYWORD}\", \"lipedema diet\"] (most specific first)"))
            .then_respond(confirmation),
    );
    let extractor = MockExtractor::new().on_page(target_page()).on_page(source_page(false));
    let h = harness(extractor, oracle.clone(), LinkCheckMode::Deferred);
    h.scout.index_pages(&[SOURCE.to_string()]).await;

    let report = h.scout.analyze_target(TARGET).await.unwrap();
    assert_eq!(report.keywords, vec![KEYWORD.to_string(), "lipedema diet".to_string()]);
    assert_eq!(report.persisted, 1);

    let stored = h.store.suggestion(TARGET, SOURCE).unwrap();
    assert_eq!(stored.anchor_origin, AnchorOrigin::Title);
    assert_eq!(stored.rationale, "Directly discusses the topic.");
    assert_well_formed(&stored);

    let request: serde_json::Value = serde_json::from_str(&oracle.prompts()[1]).unwrap();
    assert_eq!(request["targetTitle"], TARGET_TITLE);
    assert_eq!(request["candidates"][0]["matchedKeyword"], KEYWORD);
}

#[tokio::test]
async fn oracle_rejections_are_respected() {
    let oracle = Arc::new(
        EchoOracle::new()
            .with_keywords(TARGET_TITLE, &[KEYWORD])
            .rejecting(OTHER_SOURCE),
    );
    let extractor = MockExtractor::new()
        .on_page(target_page())
        .on_page(source_page(false))
        .on_page(other_source_page());
    let h = harness(extractor, oracle, LinkCheckMode::Deferred);
    h.scout
        .index_pages(&[SOURCE.to_string(), OTHER_SOURCE.to_string()])
        .await;

    let report = h.scout.analyze_target(TARGET).await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.confirmed, 1);
    assert!(h.store.suggestion(TARGET, OTHER_SOURCE).is_none());
}
