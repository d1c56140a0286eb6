//! Statistical aggregations over the article store.
//!
//! Grouping, counting and averaging run inside SQLite; only the second-level
//! trend grouping (rows already ordered by day) is folded here.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::db::{
    format_timestamp, parse_label, push_filters, ArticleFilter, Database, SentimentLabel,
    StoreResult,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentStat {
    pub label: SentimentLabel,
    pub count: i64,
    pub avg_score: f64,
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentStats {
    pub groups: Vec<SentimentStat>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SourceStat {
    pub source: String,
    pub count: i64,
    pub positive: i64,
    pub negative: i64,
    pub neutral: i64,
    pub avg_sentiment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: SentimentLabel,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// UTC calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub sentiments: Vec<LabelCount>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: i64,
}

/// `count / total * 100`, rounded half up; zero when there is nothing to divide by.
pub fn percentage(count: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (count * 200 + total) / (total * 2)
}

impl Database {
    pub async fn sentiment_stats(&self, filter: &ArticleFilter) -> StoreResult<SentimentStats> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT sentiment_label, COUNT(*) AS count, ROUND(AVG(sentiment_score), 4) AS avg_score FROM articles",
        );
        push_filters(&mut qb, filter);
        qb.push(" GROUP BY sentiment_label ORDER BY count DESC, sentiment_label ASC");

        let rows: Vec<(String, i64, f64)> = qb.build_query_as().fetch_all(&self.pool).await?;
        let total: i64 = rows.iter().map(|(_, count, _)| count).sum();

        let groups = rows
            .into_iter()
            .map(|(label, count, avg_score)| {
                Ok(SentimentStat {
                    label: parse_label(&label)?,
                    count,
                    avg_score,
                    percentage: percentage(count, total),
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(SentimentStats { groups, total })
    }

    pub async fn source_stats(&self) -> StoreResult<Vec<SourceStat>> {
        let stats = sqlx::query_as::<_, SourceStat>(
            r#"
            SELECT source,
                   COUNT(*) AS count,
                   SUM(CASE WHEN sentiment_label = 'positive' THEN 1 ELSE 0 END) AS positive,
                   SUM(CASE WHEN sentiment_label = 'negative' THEN 1 ELSE 0 END) AS negative,
                   SUM(CASE WHEN sentiment_label = 'neutral' THEN 1 ELSE 0 END) AS neutral,
                   ROUND(AVG(sentiment_score), 4) AS avg_sentiment
            FROM articles
            GROUP BY source
            ORDER BY count DESC, source ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }

    /// Daily label counts for articles scraped in `[now - days, now]`.
    /// Days without articles are absent from the result.
    pub async fn sentiment_trends(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<TrendPoint>> {
        // An empty lower bound sorts before every stored timestamp.
        let start = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .map(format_timestamp)
            .unwrap_or_default();

        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT substr(scraped_at, 1, 10) AS day, sentiment_label, COUNT(*) AS count
            FROM articles
            WHERE scraped_at >= ? AND scraped_at <= ?
            GROUP BY day, sentiment_label
            ORDER BY day ASC, sentiment_label ASC
            "#,
        )
        .bind(start)
        .bind(format_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        let mut points: Vec<TrendPoint> = Vec::new();
        for (day, label, count) in rows {
            let entry = LabelCount {
                label: parse_label(&label)?,
                count,
            };
            match points.last_mut() {
                Some(point) if point.date == day => {
                    point.total += count;
                    point.sentiments.push(entry);
                }
                _ => points.push(TrendPoint {
                    date: day,
                    sentiments: vec![entry],
                    total: count,
                }),
            }
        }

        Ok(points)
    }

    /// Most frequent keywords, one count per occurrence in each article.
    pub async fn top_keywords(&self, limit: i64) -> StoreResult<Vec<KeywordCount>> {
        let keywords = sqlx::query_as::<_, KeywordCount>(
            r#"
            SELECT json_each.value AS keyword, COUNT(*) AS count
            FROM articles, json_each(articles.keywords)
            GROUP BY json_each.value
            ORDER BY count DESC, MIN(articles.id) ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(keywords)
    }
}
