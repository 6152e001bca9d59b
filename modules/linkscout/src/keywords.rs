use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::OracleError;
use crate::oracle::{decode_json_array, truncate_to_char_boundary};
use crate::traits::LanguageOracle;

pub const MAX_KEYWORDS: usize = 10;
const MIN_KEYWORD_CHARS: usize = 3;
const CONTENT_BYTES: usize = 6_000;

const KEYWORD_SYSTEM_PROMPT: &str = r#"You pick the search phrases under which other pages of the same website could mention a given page.

Read the page title and content. Return between 3 and 10 phrases that:
- name the specific subject of the page (prefer 2-5 word phrases)
- are phrased the way a writer would naturally use them mid-sentence
- include common variations (singular/plural, synonyms) only when each is likely to appear verbatim
- avoid generic single words ("health", "tips", "guide") and brand names

Respond with ONLY a JSON array of strings, most specific first. No prose."#;

#[derive(Serialize)]
struct KeywordRequest<'a> {
    title: &'a str,
    content: &'a str,
}

/// Generates search keywords for a page. Callers cache the result; the
/// generator itself never looks at the store.
#[derive(Clone)]
pub struct KeywordGenerator {
    oracle: Arc<dyn LanguageOracle>,
}

impl KeywordGenerator {
    pub fn new(oracle: Arc<dyn LanguageOracle>) -> Self {
        Self { oracle }
    }

    pub fn build_prompt(title: &str, content: &str) -> Result<String, OracleError> {
        let request = KeywordRequest {
            title: title.trim(),
            content: truncate_to_char_boundary(content.trim(), CONTENT_BYTES),
        };
        serde_json::to_string_pretty(&request)
            .map_err(|e| OracleError::Request(format!("unserializable request: {e}")))
    }

    pub async fn generate(&self, title: &str, content: &str) -> Result<Vec<String>, OracleError> {
        let prompt = Self::build_prompt(title, content)?;
        let raw = self.oracle.complete(KEYWORD_SYSTEM_PROMPT, &prompt).await?;
        let keywords = clean_keywords(decode_json_array::<String>(&raw)?);
        info!(title, count = keywords.len(), "Generated keywords");
        Ok(keywords)
    }
}

/// Trim, lowercase, collapse whitespace, drop near-empty phrases and
/// duplicates (first occurrence wins), cap at `MAX_KEYWORDS`.
pub fn clean_keywords<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for keyword in raw {
        let keyword = keyword
            .as_ref()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if keyword.chars().count() < MIN_KEYWORD_CHARS || out.contains(&keyword) {
            continue;
        }
        out.push(keyword);
        if out.len() == MAX_KEYWORDS {
            break;
        }
    }
    out
}
