// Postgres persistence for pages, sentence fragments and suggestions.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use linkscout_common::{Page, Sentence, Suggestion};

use crate::error::StoreError;
use crate::traits::{PageStore, SentenceStore, SuggestionStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PageRow {
    url: String,
    title: String,
    content: String,
    keywords: Vec<String>,
    keywords_generated_at: Option<DateTime<Utc>>,
    indexed_at: DateTime<Utc>,
}

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Self {
        Page {
            url: row.url,
            title: row.title,
            content: row.content,
            keywords: row.keywords,
            keywords_generated_at: row.keywords_generated_at,
            indexed_at: row.indexed_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SentenceRow {
    page_url: String,
    page_title: String,
    text: String,
    outbound_links: Vec<String>,
}

impl From<SentenceRow> for Sentence {
    fn from(row: SentenceRow) -> Self {
        Sentence {
            page_url: row.page_url,
            page_title: row.page_title,
            text: row.text,
            outbound_links: row.outbound_links.into_iter().collect::<BTreeSet<_>>(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SuggestionRow {
    target_url: String,
    target_title: String,
    source_url: String,
    source_title: String,
    anchor_text: String,
    anchor_origin: String,
    context_sentence: String,
    rationale: String,
    review_status: String,
    link_verified: bool,
}

impl TryFrom<SuggestionRow> for Suggestion {
    type Error = StoreError;

    fn try_from(row: SuggestionRow) -> Result<Self, Self::Error> {
        Ok(Suggestion {
            anchor_origin: row
                .anchor_origin
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("suggestions.anchor_origin: {e}")))?,
            review_status: row
                .review_status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("suggestions.review_status: {e}")))?,
            target_url: row.target_url,
            target_title: row.target_title,
            source_url: row.source_url,
            source_title: row.source_title,
            anchor_text: row.anchor_text,
            context_sentence: row.context_sentence,
            rationale: row.rationale,
            link_verified: row.link_verified,
        })
    }
}

const SUGGESTION_COLUMNS: &str = "target_url, target_title, source_url, source_title, anchor_text, \
     anchor_origin, context_sentence, rationale, review_status, link_verified";

/// `%keyword%` for ILIKE with the wildcard characters escaped.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PageStore for PgStore {
    async fn get_page(&self, url: &str) -> Result<Option<Page>, StoreError> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT url, title, content, keywords, keywords_generated_at, indexed_at
            FROM pages
            WHERE url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Page::from))
    }

    async fn upsert_page(&self, url: &str, title: &str, content: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pages (id, url, title, content)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (url) DO UPDATE SET
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                indexed_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(url)
        .bind(title)
        .bind(content)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_keywords(&self, url: &str, keywords: &[String]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE pages
            SET keywords = $2, keywords_generated_at = now()
            WHERE url = $1
            "#,
        )
        .bind(url)
        .bind(keywords)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_keywords(&self, url: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pages
            SET keywords = '{}', keywords_generated_at = NULL
            WHERE url = $1
            "#,
        )
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SentenceStore for PgStore {
    async fn replace_sentences(
        &self,
        page_url: &str,
        page_title: &str,
        sentences: &[Sentence],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent reindexes of the same page so the surviving
        // fragment set always comes from a single call.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(page_url)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM sentences WHERE page_url = $1")
            .bind(page_url)
            .execute(&mut *tx)
            .await?;

        for sentence in sentences {
            let links: Vec<String> = sentence.outbound_links.iter().cloned().collect();
            sqlx::query(
                r#"
                INSERT INTO sentences (page_url, page_title, text, outbound_links)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(page_url)
            .bind(page_title)
            .bind(&sentence.text)
            .bind(&links)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_keyword(
        &self,
        keyword: &str,
        exclude_page_url: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Sentence>, StoreError> {
        let rows = sqlx::query_as::<_, SentenceRow>(
            r#"
            SELECT page_url, page_title, text, outbound_links
            FROM sentences
            WHERE text ILIKE $1 ESCAPE '\' AND page_url <> $2
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(like_pattern(keyword))
        .bind(exclude_page_url)
        .bind(sql_limit(limit))
        .bind(sql_limit(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Sentence::from).collect())
    }

    async fn page_links_to(&self, page_url: &str, target_url: &str) -> Result<bool, StoreError> {
        let linked = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sentences
                WHERE page_url = $1 AND $2 = ANY(outbound_links)
            )
            "#,
        )
        .bind(page_url)
        .bind(target_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(linked)
    }

    async fn sentences_for_page(&self, page_url: &str) -> Result<Vec<Sentence>, StoreError> {
        let rows = sqlx::query_as::<_, SentenceRow>(
            r#"
            SELECT page_url, page_title, text, outbound_links
            FROM sentences
            WHERE page_url = $1
            ORDER BY id
            "#,
        )
        .bind(page_url)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Sentence::from).collect())
    }
}

#[async_trait]
impl SuggestionStore for PgStore {
    async fn upsert_suggestions(&self, suggestions: &[Suggestion]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        // Review state is owned by the review surface: never overwritten here.
        for s in suggestions {
            let result = sqlx::query(
                r#"
                INSERT INTO suggestions
                    (id, target_url, target_title, source_url, source_title, anchor_text,
                     anchor_origin, context_sentence, rationale, review_status, link_verified)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (target_url, source_url) DO UPDATE SET
                    target_title = EXCLUDED.target_title,
                    source_title = EXCLUDED.source_title,
                    anchor_text = EXCLUDED.anchor_text,
                    anchor_origin = EXCLUDED.anchor_origin,
                    context_sentence = EXCLUDED.context_sentence,
                    rationale = EXCLUDED.rationale,
                    updated_at = clock_timestamp()
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&s.target_url)
            .bind(&s.target_title)
            .bind(&s.source_url)
            .bind(&s.source_title)
            .bind(&s.anchor_text)
            .bind(s.anchor_origin.as_str())
            .bind(&s.context_sentence)
            .bind(&s.rationale)
            .bind(s.review_status.as_str())
            .bind(s.link_verified)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn unverified_suggestions(&self, limit: usize) -> Result<Vec<Suggestion>, StoreError> {
        let rows = sqlx::query_as::<_, SuggestionRow>(&format!(
            "SELECT {SUGGESTION_COLUMNS} FROM suggestions \
             WHERE NOT link_verified \
             ORDER BY created_at, target_url, source_url \
             LIMIT $1"
        ))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Suggestion::try_from).collect()
    }

    async fn mark_link_verified(
        &self,
        target_url: &str,
        source_url: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE suggestions
            SET link_verified = true, link_checked_at = now()
            WHERE target_url = $1 AND source_url = $2
            "#,
        )
        .bind(target_url)
        .bind(source_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_suggestion(&self, target_url: &str, source_url: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM suggestions WHERE target_url = $1 AND source_url = $2")
            .bind(target_url)
            .bind(source_url)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn suggestions_for_target(&self, target_url: &str) -> Result<Vec<Suggestion>, StoreError> {
        let rows = sqlx::query_as::<_, SuggestionRow>(&format!(
            "SELECT {SUGGESTION_COLUMNS} FROM suggestions \
             WHERE target_url = $1 \
             ORDER BY created_at, source_url"
        ))
        .bind(target_url)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Suggestion::try_from).collect()
    }
}
