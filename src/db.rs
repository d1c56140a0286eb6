use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::params::{DEFAULT_LIMIT, DEFAULT_PAGE};

pub const DEFAULT_CATEGORY: &str = "General";

const SELECT_ARTICLE: &str = r#"
    SELECT id, title, url, description, content, source, category,
           published_date, scraped_at,
           sentiment_score, sentiment_label, sentiment_compound,
           sentiment_positive, sentiment_negative, sentiment_neutral,
           keywords, created_at, updated_at
    FROM articles"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("article with url '{0}' already exists")]
    Duplicate(String),
    #[error("invalid article: {0}")]
    InvalidArticle(String),
    #[error("corrupt article row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sentiment label '{0}'")]
pub struct UnknownLabel(pub String);

impl FromStr for SentimentLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(SentimentLabel::Positive),
            "negative" => Ok(SentimentLabel::Negative),
            "neutral" => Ok(SentimentLabel::Neutral),
            other => Err(UnknownLabel(other.to_string())),
        }
    }
}

/// Sentiment record attached to every article by the upstream scoring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// Normalized score in `[-1, 1]`.
    pub score: f64,
    pub label: SentimentLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neutral: Option<f64>,
}

impl Sentiment {
    pub fn new(score: f64, label: SentimentLabel) -> Self {
        Self {
            score,
            label,
            compound: None,
            positive: None,
            negative: None,
            neutral: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: String,
    pub content: String,
    pub source: String,
    pub category: String,
    pub published_date: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
    pub sentiment: Sentiment,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An article as handed over by the ingestion process, before the store
/// fills in defaults and assigns an id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub source: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub published_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl NewArticle {
    pub fn new(title: &str, url: &str, source: &str, sentiment: Sentiment) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            description: None,
            content: None,
            source: source.to_string(),
            category: None,
            published_date: None,
            scraped_at: None,
            sentiment,
            keywords: Vec::new(),
        }
    }

    fn validate(&self) -> StoreResult<()> {
        for (field, value) in [
            ("title", &self.title),
            ("url", &self.url),
            ("source", &self.source),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::InvalidArticle(format!("{field} must not be empty")));
            }
        }

        let score = self.sentiment.score;
        if !score.is_finite() || !(-1.0..=1.0).contains(&score) {
            return Err(StoreError::InvalidArticle(format!(
                "sentiment score {score} is outside [-1, 1]"
            )));
        }

        Ok(())
    }
}

/// Outcome of a batch insert. Duplicates are skipped, never overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleFilter {
    pub source: Option<String>,
    pub sentiment: Option<SentimentLabel>,
    pub keyword: Option<String>,
    /// Any of these terms may match the title or description.
    pub search: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    ScrapedAt,
    PublishedDate,
    CreatedAt,
    UpdatedAt,
    Title,
    Source,
    Category,
    SentimentScore,
}

impl SortField {
    pub fn from_param(name: &str) -> Option<Self> {
        let field = match name {
            "scrapedAt" => SortField::ScrapedAt,
            "publishedDate" => SortField::PublishedDate,
            "createdAt" => SortField::CreatedAt,
            "updatedAt" => SortField::UpdatedAt,
            "title" => SortField::Title,
            "source" => SortField::Source,
            "category" => SortField::Category,
            "sentiment.score" | "sentimentScore" => SortField::SentimentScore,
            _ => return None,
        };
        Some(field)
    }

    fn column(self) -> &'static str {
        match self {
            SortField::ScrapedAt => "scraped_at",
            SortField::PublishedDate => "published_date",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Title => "title",
            SortField::Source => "source",
            SortField::Category => "category",
            SortField::SentimentScore => "sentiment_score",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListOptions {
    pub filter: ArticleFilter,
    pub page: i64,
    pub limit: i64,
    pub sort_by: SortField,
    pub order: SortOrder,
}

impl ListOptions {
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0).saturating_mul(self.limit)
    }
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            filter: ArticleFilter::default(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort_by: SortField::default(),
            order: SortOrder::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let pages = if limit > 0 {
            total / limit + i64::from(total % limit != 0)
        } else {
            0
        };
        Self {
            page,
            limit,
            total,
            pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArticlePage {
    pub articles: Vec<Article>,
    pub pagination: Pagination,
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: i64,
    title: String,
    url: String,
    description: String,
    content: String,
    source: String,
    category: String,
    published_date: String,
    scraped_at: String,
    sentiment_score: f64,
    sentiment_label: String,
    sentiment_compound: Option<f64>,
    sentiment_positive: Option<f64>,
    sentiment_negative: Option<f64>,
    sentiment_neutral: Option<f64>,
    keywords: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ArticleRow> for Article {
    type Error = StoreError;

    fn try_from(row: ArticleRow) -> StoreResult<Self> {
        let keywords: Vec<String> = serde_json::from_str(&row.keywords).map_err(|e| {
            StoreError::Corrupt(format!("keywords of article {}: {}", row.id, e))
        })?;

        Ok(Article {
            id: row.id,
            title: row.title,
            url: row.url,
            description: row.description,
            content: row.content,
            source: row.source,
            category: row.category,
            published_date: parse_timestamp("published_date", &row.published_date)?,
            scraped_at: parse_timestamp("scraped_at", &row.scraped_at)?,
            sentiment: Sentiment {
                score: row.sentiment_score,
                label: parse_label(&row.sentiment_label)?,
                compound: row.sentiment_compound,
                positive: row.sentiment_positive,
                negative: row.sentiment_negative,
                neutral: row.sentiment_neutral,
            },
            keywords,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
        })
    }
}

/// Timestamps are stored as fixed-width UTC strings so that text comparison
/// is chronological and the first ten characters are the calendar day.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{column} '{raw}': {e}")))
}

pub(crate) fn parse_label(raw: &str) -> StoreResult<SentimentLabel> {
    raw.parse()
        .map_err(|e: UnknownLabel| StoreError::Corrupt(e.to_string()))
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Appends a `WHERE` clause for every constraint present in `filter`.
pub(crate) fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ArticleFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(source) = &filter.source {
        qb.push(" AND source = ").push_bind(source.clone());
    }

    if let Some(label) = filter.sentiment {
        qb.push(" AND sentiment_label = ").push_bind(label.as_str());
    }

    if let Some(keyword) = &filter.keyword {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(articles.keywords) WHERE json_each.value = ")
            .push_bind(keyword.clone())
            .push(")");
    }

    if !filter.search.is_empty() {
        qb.push(" AND (");
        for (i, term) in filter.search.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            let pattern = format!("%{}%", escape_like(term));
            qb.push("title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR description LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        qb.push(")");
    }

    if let Some(start) = filter.start_date {
        qb.push(" AND scraped_at >= ").push_bind(format_timestamp(start));
    }

    if let Some(end) = filter.end_date {
        qb.push(" AND scraped_at <= ").push_bind(format_timestamp(end));
    }
}

pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL CHECK (length(title) > 0),
                url TEXT NOT NULL UNIQUE CHECK (length(url) > 0),
                description TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL CHECK (length(source) > 0),
                category TEXT NOT NULL DEFAULT 'General',
                published_date TEXT NOT NULL,
                scraped_at TEXT NOT NULL,
                sentiment_score REAL NOT NULL
                    CHECK (sentiment_score BETWEEN -1 AND 1),
                sentiment_label TEXT NOT NULL
                    CHECK (sentiment_label IN ('positive', 'negative', 'neutral')),
                sentiment_compound REAL,
                sentiment_positive REAL,
                sentiment_negative REAL,
                sentiment_neutral REAL,
                keywords TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
                    DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL
                    DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS articles_touch_updated_at
            AFTER UPDATE ON articles
            BEGIN
                UPDATE articles
                SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = NEW.id;
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_articles_source_scraped ON articles(source, scraped_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_articles_sentiment_label ON articles(sentiment_label)",
            "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_date DESC)",
            "CREATE INDEX IF NOT EXISTS idx_articles_scraped ON articles(scraped_at DESC)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Stores a new article and returns its id. Fails with
    /// [`StoreError::Duplicate`] when the url is already present.
    pub async fn insert_article(&self, article: &NewArticle) -> StoreResult<i64> {
        article.validate()?;

        let now = Utc::now();
        let url = article.url.trim().to_string();
        let keywords: Vec<&str> = article.keywords.iter().map(|k| k.trim()).collect();
        let keywords = serde_json::to_string(&keywords)
            .map_err(|e| StoreError::InvalidArticle(format!("keywords: {e}")))?;
        let category = article
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY);

        let result = sqlx::query(
            r#"
            INSERT INTO articles (
                title, url, description, content, source, category,
                published_date, scraped_at,
                sentiment_score, sentiment_label, sentiment_compound,
                sentiment_positive, sentiment_negative, sentiment_neutral,
                keywords
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(article.title.trim())
        .bind(&url)
        .bind(article.description.as_deref().unwrap_or_default())
        .bind(article.content.as_deref().unwrap_or_default())
        .bind(article.source.trim())
        .bind(category)
        .bind(format_timestamp(article.published_date.unwrap_or(now)))
        .bind(format_timestamp(article.scraped_at.unwrap_or(now)))
        .bind(article.sentiment.score)
        .bind(article.sentiment.label.as_str())
        .bind(article.sentiment.compound)
        .bind(article.sentiment.positive)
        .bind(article.sentiment.negative)
        .bind(article.sentiment.neutral)
        .bind(keywords)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Duplicate(url.clone())
            }
            other => StoreError::Database(other),
        })?;

        Ok(result.last_insert_rowid())
    }

    pub async fn insert_articles(&self, articles: &[NewArticle]) -> InsertSummary {
        let mut summary = InsertSummary::default();

        for article in articles {
            match self.insert_article(article).await {
                Ok(_) => summary.inserted += 1,
                Err(StoreError::Duplicate(url)) => {
                    warn!("Duplicate article skipped: {}", url);
                    summary.duplicates += 1;
                }
                Err(e) => {
                    error!("Failed to insert article '{}': {}", article.url, e);
                    summary.errors += 1;
                }
            }
        }

        info!(
            "Inserted {} articles ({} duplicates skipped, {} errors)",
            summary.inserted, summary.duplicates, summary.errors
        );
        summary
    }

    pub async fn get_article(&self, id: i64) -> StoreResult<Option<Article>> {
        let sql = format!("{SELECT_ARTICLE} WHERE id = ?");
        let row = sqlx::query_as::<_, ArticleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Article::try_from).transpose()
    }

    pub async fn list_articles(&self, options: &ListOptions) -> StoreResult<ArticlePage> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM articles");
        push_filters(&mut count, &options.filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(SELECT_ARTICLE);
        push_filters(&mut select, &options.filter);
        let column = options.sort_by.column();
        let direction = options.order.sql();
        select.push(format!(" ORDER BY {column} {direction}, id {direction} LIMIT "));
        select
            .push_bind(options.limit)
            .push(" OFFSET ")
            .push_bind(options.offset());

        let rows: Vec<ArticleRow> = select.build_query_as().fetch_all(&self.pool).await?;
        let articles = rows
            .into_iter()
            .map(Article::try_from)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ArticlePage {
            articles,
            pagination: Pagination::new(options.page, options.limit, total),
        })
    }
}
