//! Integration tests for the news sentiment API
//!
//! These tests run the full router against a file-backed SQLite database,
//! the same way the binary wires things together.

use std::sync::Arc;

use axum_test::TestServer;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};

use news_sentiment_api::config::Config;
use news_sentiment_api::db::{Database, NewArticle, Sentiment, SentimentLabel};
use news_sentiment_api::routes::{router, AppState};

mod common {
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("articles.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }
}

/// Builds an article from the JSON document the scraper hands over.
fn new_article(n: usize, source: &str, label: SentimentLabel, keywords: &[&str]) -> NewArticle {
    let score = match label {
        SentimentLabel::Positive => 0.4,
        SentimentLabel::Negative => -0.6,
        SentimentLabel::Neutral => 0.0,
    };
    serde_json::from_value(json!({
        "title": format!("Headline {}", n),
        "url": format!("https://x/{}", n),
        "source": source,
        "sentiment": {"score": score, "label": label},
        "keywords": keywords,
    }))
    .expect("fixture article should deserialize")
}

async fn open_db(db_url: &str) -> Database {
    let db = Database::new(db_url).await.unwrap();
    db.initialize().await.unwrap();
    db
}

fn server_for(db: Database) -> TestServer {
    let state = Arc::new(AppState::new(db, Config::default()));
    TestServer::new(router(state)).unwrap()
}

/// 10 positive, 10 neutral, 5 negative across two sources, all scraped recently.
async fn seed_dashboard(db: &Database) {
    let now = Utc::now();
    let mut batch = Vec::new();
    for i in 0..25 {
        let label = match i {
            0..=9 => SentimentLabel::Positive,
            10..=19 => SentimentLabel::Neutral,
            _ => SentimentLabel::Negative,
        };
        let source = if i < 15 { "BBC" } else { "NDTV" };
        let keywords: &[&str] = if i % 2 == 0 {
            &["election", "economy"]
        } else {
            &["economy"]
        };
        let mut article = new_article(i, source, label, keywords);
        article.scraped_at = Some(now - Duration::hours(i as i64 * 4));
        batch.push(article);
    }

    let summary = db.insert_articles(&batch).await;
    assert_eq!(summary.inserted, 25);
}

#[cfg(test)]
mod article_endpoint_tests {
    use super::common::*;
    use super::*;

    #[tokio::test]
    async fn test_round_trip_through_api() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;

        let published = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        let mut article = new_article(1, "BBC", SentimentLabel::Positive, &["budget"]);
        article.description = Some("Budget passes".to_string());
        article.category = Some("Politics".to_string());
        article.published_date = Some(published);
        article.scraped_at = Some(published);
        let id = db.insert_article(&article).await.unwrap();

        let server = server_for(db);
        let response = server.get(&format!("/api/articles/{}", id)).await;

        response.assert_status_ok();
        let body = response.json::<Value>();
        let data = &body["data"];
        assert_eq!(body["success"], true);
        assert_eq!(data["id"], id);
        assert_eq!(data["title"], "Headline 1");
        assert_eq!(data["url"], "https://x/1");
        assert_eq!(data["description"], "Budget passes");
        assert_eq!(data["content"], "");
        assert_eq!(data["category"], "Politics");
        assert_eq!(data["publishedDate"], "2024-05-01T06:30:00Z");
        assert_eq!(data["scrapedAt"], "2024-05-01T06:30:00Z");
        assert_eq!(data["keywords"], json!(["budget"]));
        assert_eq!(data["sentiment"]["label"], "positive");
    }

    #[tokio::test]
    async fn test_scraped_document_round_trip() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;

        let article: NewArticle = serde_json::from_value(json!({
            "title": "Monsoon arrives early",
            "url": "https://x/monsoon",
            "source": "NDTV",
            "publishedDate": "2024-06-01T04:00:00Z",
            "sentiment": {
                "score": -0.25,
                "label": "negative",
                "compound": -0.25,
                "positive": 0.1,
                "negative": 0.3,
                "neutral": 0.6
            },
            "keywords": ["monsoon", "weather"]
        }))
        .unwrap();
        assert_eq!(
            article.sentiment,
            Sentiment {
                score: -0.25,
                label: SentimentLabel::Negative,
                compound: Some(-0.25),
                positive: Some(0.1),
                negative: Some(0.3),
                neutral: Some(0.6),
            }
        );
        let id = db.insert_article(&article).await.unwrap();

        let server = server_for(db);
        let body = server
            .get(&format!("/api/articles/{}", id))
            .await
            .json::<Value>();
        let data = &body["data"];

        assert_eq!(data["category"], "General");
        assert_eq!(data["description"], "");
        assert_eq!(data["publishedDate"], "2024-06-01T04:00:00Z");
        assert_eq!(data["sentiment"]["neutral"], 0.6);
        assert_eq!(data["keywords"], json!(["monsoon", "weather"]));
    }

    #[tokio::test]
    async fn test_pagination_over_filtered_set() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        seed_dashboard(&db).await;
        let server = server_for(db);

        let response = server
            .get("/api/articles")
            .add_query_param("page", 2)
            .add_query_param("limit", 10)
            .await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["data"].as_array().unwrap().len(), 10);
        assert_eq!(
            body["pagination"],
            json!({"page": 2, "limit": 10, "total": 25, "pages": 3})
        );

        let body = server
            .get("/api/articles")
            .add_query_param("source", "NDTV")
            .add_query_param("limit", 4)
            .await
            .json::<Value>();
        assert_eq!(body["pagination"]["total"], 10);
        assert_eq!(body["pagination"]["pages"], 3);

        let body = server
            .get("/api/articles")
            .add_query_param("source", "NDTV")
            .add_query_param("sentiment", "negative")
            .await
            .json::<Value>();
        assert_eq!(body["pagination"]["total"], 5);
    }

    #[tokio::test]
    async fn test_page_past_the_end_is_empty() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        seed_dashboard(&db).await;
        let server = server_for(db);

        let response = server
            .get("/api/articles")
            .add_query_param("page", 50)
            .await;

        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["pagination"]["total"], 25);
    }

    #[tokio::test]
    async fn test_invalid_ids_never_fault() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        let server = server_for(db);

        for id in ["abc", "65f1c0ffee", "-1", "99999999999999999999999"] {
            let response = server.get(&format!("/api/articles/{}", id)).await;
            response.assert_status_not_found();
            assert_eq!(response.json::<Value>()["success"], false);
        }
    }

    #[tokio::test]
    async fn test_invalid_sentiment_filter_is_client_error() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        let server = server_for(db);

        let response = server
            .get("/api/articles")
            .add_query_param("sentiment", "furious")
            .await;

        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["success"], false);
    }
}

#[cfg(test)]
mod statistics_endpoint_tests {
    use super::common::*;
    use super::*;

    #[tokio::test]
    async fn test_sentiment_distribution() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        seed_dashboard(&db).await;
        let server = server_for(db);

        let body = server
            .get("/api/articles/stats/sentiment")
            .await
            .json::<Value>();

        assert_eq!(body["total"], 25);
        let groups = body["data"].as_array().unwrap();
        let counts: Vec<i64> = groups.iter().map(|g| g["count"].as_i64().unwrap()).collect();
        let percentages: Vec<i64> = groups
            .iter()
            .map(|g| g["percentage"].as_i64().unwrap())
            .collect();
        assert_eq!(counts, vec![10, 10, 5]);
        assert_eq!(percentages, vec![40, 40, 20]);
    }

    #[tokio::test]
    async fn test_sentiment_distribution_for_unknown_source() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        seed_dashboard(&db).await;
        let server = server_for(db);

        let body = server
            .get("/api/articles/stats/sentiment")
            .add_query_param("source", "Reuters")
            .await
            .json::<Value>();

        assert_eq!(body, json!({"success": true, "data": [], "total": 0}));
    }

    #[tokio::test]
    async fn test_source_breakdown_adds_up() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        seed_dashboard(&db).await;
        let server = server_for(db);

        let body = server
            .get("/api/articles/stats/sources")
            .await
            .json::<Value>();

        let sources = body["data"].as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0]["source"], "BBC");
        assert_eq!(sources[0]["count"], 15);
        assert_eq!(sources[0]["positive"], 10);
        assert_eq!(sources[0]["neutral"], 5);
        assert_eq!(sources[0]["negative"], 0);
        for source in sources {
            let parts = source["positive"].as_i64().unwrap()
                + source["negative"].as_i64().unwrap()
                + source["neutral"].as_i64().unwrap();
            assert_eq!(parts, source["count"].as_i64().unwrap());
        }
    }

    #[tokio::test]
    async fn test_trends_are_sparse_and_ordered() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        seed_dashboard(&db).await;
        let server = server_for(db);

        let body = server
            .get("/api/articles/stats/trends")
            .add_query_param("days", 30)
            .await
            .json::<Value>();

        let points = body["data"].as_array().unwrap();
        assert!(!points.is_empty());
        let total: i64 = points.iter().map(|p| p["total"].as_i64().unwrap()).sum();
        assert_eq!(total, 25);
        for point in points {
            assert!(point["total"].as_i64().unwrap() > 0);
        }
        let dates: Vec<&str> = points.iter().map(|p| p["date"].as_str().unwrap()).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[tokio::test]
    async fn test_top_keywords() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;
        seed_dashboard(&db).await;
        let server = server_for(db);

        let body = server
            .get("/api/articles/keywords/top")
            .add_query_param("limit", 1)
            .await
            .json::<Value>();

        assert_eq!(body["data"], json!([{"keyword": "economy", "count": 25}]));

        let body = server
            .get("/api/articles/keywords/top")
            .await
            .json::<Value>();
        assert_eq!(body["data"][1], json!({"keyword": "election", "count": 13}));
    }
}

#[cfg(test)]
mod persistence_tests {
    use super::common::*;
    use super::*;

    #[tokio::test]
    async fn test_articles_survive_reopen() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        {
            let db = open_db(&db_url).await;
            db.insert_article(&new_article(1, "BBC", SentimentLabel::Neutral, &[]))
                .await
                .unwrap();
        }

        let db = Database::new(&db_url).await.unwrap();
        let server = server_for(db);
        let body = server.get("/api/articles").await.json::<Value>();

        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["url"], "https://x/1");
    }

    #[tokio::test]
    async fn test_reinsert_does_not_overwrite() {
        let temp_dir = create_temp_dir();
        let db = open_db(&create_db_path(&temp_dir)).await;

        let original = new_article(1, "BBC", SentimentLabel::Positive, &[]);
        let mut rescraped = new_article(1, "BBC", SentimentLabel::Negative, &[]);
        rescraped.title = "Changed headline".to_string();

        let summary = db.insert_articles(&[original, rescraped]).await;
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.duplicates, 1);

        let server = server_for(db);
        let body = server.get("/api/articles").await.json::<Value>();
        assert_eq!(body["data"][0]["title"], "Headline 1");
        assert_eq!(body["data"][0]["sentiment"]["label"], "positive");
    }
}
