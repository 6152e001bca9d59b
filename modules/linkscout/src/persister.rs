use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use linkscout_common::{normalize, Suggestion};

use crate::error::StoreError;
use crate::traits::SuggestionStore;

/// Writes confirmed suggestions for one target.
pub struct SuggestionPersister {
    store: Arc<dyn SuggestionStore>,
}

impl SuggestionPersister {
    pub fn new(store: Arc<dyn SuggestionStore>) -> Self {
        Self { store }
    }

    /// Upsert suggestions for `target_url`. An empty batch writes nothing.
    /// Re-running with the same input leaves `review_status` and
    /// `link_verified` of existing rows untouched.
    pub async fn upsert(
        &self,
        target_url: &str,
        target_title: &str,
        suggestions: Vec<Suggestion>,
    ) -> Result<u64, StoreError> {
        if suggestions.is_empty() {
            return Ok(0);
        }
        let target_url = normalize(target_url, None);
        let batch = prepare_batch(&target_url, target_title, suggestions);
        if batch.is_empty() {
            return Ok(0);
        }
        let written = self.store.upsert_suggestions(&batch).await?;
        info!(target = %target_url, written, "Saved suggestions");
        Ok(written)
    }
}

/// Stamp the target onto every suggestion, canonicalize the source and keep
/// the first suggestion per source. Self-links are dropped.
pub fn prepare_batch(target_url: &str, target_title: &str, suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut seen: HashSet<String> = HashSet::new();
    suggestions
        .into_iter()
        .filter_map(|mut s| {
            s.source_url = normalize(&s.source_url, None);
            s.target_url = target_url.to_string();
            s.target_title = target_title.to_string();
            (s.source_url != target_url && seen.insert(s.source_url.clone())).then_some(s)
        })
        .collect()
}
