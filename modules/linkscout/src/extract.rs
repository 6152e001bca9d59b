use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use linkscout_common::{normalize, ExtractedPage};

use crate::error::FetchError;
use crate::html::parse_html;
use crate::readability::main_content_markdown;
use crate::traits::ContentExtractor;

/// Plain HTTP content extractor. Every request carries the client-level
/// timeout; a timeout surfaces as `FetchError::Timeout` like any other
/// fetch failure.
pub struct HttpExtractor {
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        info!(timeout_secs = timeout.as_secs(), user_agent, "HttpExtractor initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    async fn fetch(&self, url: &str) -> Result<ExtractedPage, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            });
        }

        info!(url, fetcher = "http", "Fetching page");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "Non-success response");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Relative hrefs resolve against the post-redirect location.
        let base = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let parsed = parse_html(&html, &base);
        let mut plain_text = main_content_markdown(&html, &base);
        if plain_text.is_empty() {
            plain_text = parsed
                .blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
        }

        info!(
            url,
            fetcher = "http",
            bytes = html.len(),
            blocks = parsed.blocks.len(),
            links = parsed.outbound_links.len(),
            "Fetched successfully"
        );

        Ok(ExtractedPage {
            url: normalize(url, None),
            title: parsed.title,
            plain_text,
            blocks: parsed.blocks,
            outbound_links: parsed.outbound_links,
        })
    }
}
