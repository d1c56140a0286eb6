//! Query-string normalization.
//!
//! Every raw field is an optional string so that extraction itself never
//! fails on a malformed number; each endpoint's `normalize` applies the
//! default policy and produces the typed options the store consumes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::db::{ArticleFilter, ListOptions, SentimentLabel, SortField, SortOrder};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 20;
pub const DEFAULT_TREND_DAYS: i64 = 7;
pub const DEFAULT_KEYWORD_LIMIT: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("Invalid {name}: '{value}' is not a valid date")]
    InvalidDate { name: &'static str, value: String },
    #[error("Invalid sentiment: '{0}' (expected positive, negative or neutral)")]
    InvalidSentiment(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub source: Option<String>,
    pub sentiment: Option<String>,
    pub keyword: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

impl ListParams {
    pub fn normalize(&self) -> Result<ListOptions, ParamError> {
        let sentiment = match non_empty(&self.sentiment) {
            Some(raw) => Some(
                raw.parse::<SentimentLabel>()
                    .map_err(|_| ParamError::InvalidSentiment(raw.to_string()))?,
            ),
            None => None,
        };

        let search = non_empty(&self.search)
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let filter = ArticleFilter {
            source: non_empty(&self.source).map(str::to_string),
            sentiment,
            keyword: non_empty(&self.keyword).map(str::to_string),
            search,
            start_date: parse_date("startDate", &self.start_date)?,
            end_date: parse_date("endDate", &self.end_date)?,
        };

        let sort_by = non_empty(&self.sort_by)
            .and_then(SortField::from_param)
            .unwrap_or_default();

        let order = match non_empty(&self.order).map(str::to_ascii_lowercase).as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };

        Ok(ListOptions {
            filter,
            page: positive_or(&self.page, DEFAULT_PAGE),
            limit: positive_or(&self.limit, DEFAULT_LIMIT),
            sort_by,
            order,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsParams {
    pub source: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl StatsParams {
    pub fn normalize(&self) -> Result<ArticleFilter, ParamError> {
        Ok(ArticleFilter {
            source: non_empty(&self.source).map(str::to_string),
            start_date: parse_date("startDate", &self.start_date)?,
            end_date: parse_date("endDate", &self.end_date)?,
            ..ArticleFilter::default()
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TrendParams {
    pub days: Option<String>,
}

impl TrendParams {
    pub fn normalize(&self) -> i64 {
        positive_or(&self.days, DEFAULT_TREND_DAYS)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct KeywordParams {
    pub limit: Option<String>,
}

impl KeywordParams {
    pub fn normalize(&self) -> i64 {
        positive_or(&self.limit, DEFAULT_KEYWORD_LIMIT)
    }
}

fn non_empty(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn positive_or(raw: &Option<String>, default: i64) -> i64 {
    non_empty(raw)
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
fn parse_date(name: &'static str, raw: &Option<String>) -> Result<Option<DateTime<Utc>>, ParamError> {
    let Some(value) = non_empty(raw) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Some(midnight.and_utc()))
        .ok_or_else(|| ParamError::InvalidDate {
            name,
            value: value.to_string(),
        })
}
