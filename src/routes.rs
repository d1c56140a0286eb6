use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

use crate::config::Config;
use crate::db::{Article, Database, Pagination};
use crate::params::{KeywordParams, ListParams, ParamError, StatsParams, TrendParams};
use crate::stats::{KeywordCount, SentimentStat, SourceStat, TrendPoint};

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            db: Arc::new(db),
            config: Arc::new(config),
        }
    }

    /// Logs a store failure and hides its text unless running in development.
    fn server_error(&self, message: &str, err: impl Display) -> AppError {
        error!("{}: {}", message, err);
        AppError::Server {
            message: message.to_string(),
            detail: self.config.is_development().then(|| err.to_string()),
        }
    }
}

/// Uniform response body: `{success, data?, error?, message?, pagination?, total?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            pagination: None,
            total: None,
        }
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn with_total(mut self, total: i64) -> Self {
        self.total = Some(total);
        self
    }
}

impl ApiResponse<()> {
    pub fn failure(error: impl Into<String>, message: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message,
            pagination: None,
            total: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Server {
        message: String,
        detail: Option<String>,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::NotFound(error) => (StatusCode::NOT_FOUND, ApiResponse::failure(error, None)),
            AppError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, ApiResponse::failure(error, None))
            }
            AppError::Server { message, detail } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::failure(message, detail),
            ),
        };
        (status, body).into_response()
    }
}

impl From<ParamError> for AppError {
    fn from(err: ParamError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let verbose = state.config.is_development();
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET]);

    // Literal segments under /api/articles are registered ahead of the
    // `:id` capture so they are never read as ids.
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/articles", get(list_articles))
        .route("/api/articles/stats/sentiment", get(sentiment_stats))
        .route("/api/articles/stats/sources", get(source_stats))
        .route("/api/articles/stats/trends", get(sentiment_trends))
        .route("/api/articles/keywords/top", get(top_keywords))
        .route("/api/articles/:id", get(get_article))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CatchPanicLayer::custom(
                    move |panic: Box<dyn Any + Send + 'static>| panic_response(panic, verbose),
                )),
        )
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>, verbose: bool) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()));
    error!(
        "Request handler panicked: {}",
        detail.as_deref().unwrap_or("unknown cause")
    );

    AppError::Server {
        message: "Something went wrong!".to_string(),
        detail: detail.filter(|_| verbose),
    }
    .into_response()
}

// Route handlers
pub async fn index() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "Welcome to News Aggregator API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "articles": "/api/articles",
            "health": "/api/health",
            "sentimentStats": "/api/articles/stats/sentiment",
            "sourceStats": "/api/articles/stats/sources",
            "trends": "/api/articles/stats/trends",
            "keywords": "/api/articles/keywords/top"
        }
    }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "News Aggregator API is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<ApiResponse<Vec<Article>>, AppError> {
    let Query(params) = query?;
    let options = params.normalize()?;

    let page = state
        .db
        .list_articles(&options)
        .await
        .map_err(|e| state.server_error("Server error while fetching articles", e))?;

    Ok(ApiResponse::ok(page.articles).with_pagination(page.pagination))
}

pub async fn get_article(
    State(state): State<Arc<AppState>>,
    id: Result<Path<String>, PathRejection>,
) -> Result<ApiResponse<Article>, AppError> {
    let not_found = || AppError::NotFound("Article not found".to_string());

    // Anything that is not a row id cannot name an article.
    let id = match id {
        Ok(Path(raw)) => raw.trim().parse::<i64>().map_err(|_| not_found())?,
        Err(_) => return Err(not_found()),
    };

    let article = state
        .db
        .get_article(id)
        .await
        .map_err(|e| state.server_error("Server error while fetching article", e))?
        .ok_or_else(not_found)?;

    Ok(ApiResponse::ok(article))
}

pub async fn sentiment_stats(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StatsParams>, QueryRejection>,
) -> Result<ApiResponse<Vec<SentimentStat>>, AppError> {
    let Query(params) = query?;
    let filter = params.normalize()?;

    let stats = state
        .db
        .sentiment_stats(&filter)
        .await
        .map_err(|e| state.server_error("Server error while fetching statistics", e))?;

    Ok(ApiResponse::ok(stats.groups).with_total(stats.total))
}

pub async fn source_stats(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Vec<SourceStat>>, AppError> {
    let stats = state
        .db
        .source_stats()
        .await
        .map_err(|e| state.server_error("Server error while fetching source statistics", e))?;

    Ok(ApiResponse::ok(stats))
}

pub async fn sentiment_trends(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TrendParams>, QueryRejection>,
) -> Result<ApiResponse<Vec<TrendPoint>>, AppError> {
    let Query(params) = query?;
    let days = params.normalize();

    let trends = state
        .db
        .sentiment_trends(days, Utc::now())
        .await
        .map_err(|e| state.server_error("Server error while fetching trends", e))?;

    Ok(ApiResponse::ok(trends))
}

pub async fn top_keywords(
    State(state): State<Arc<AppState>>,
    query: Result<Query<KeywordParams>, QueryRejection>,
) -> Result<ApiResponse<Vec<KeywordCount>>, AppError> {
    let Query(params) = query?;
    let limit = params.normalize();

    let keywords = state
        .db
        .top_keywords(limit)
        .await
        .map_err(|e| state.server_error("Server error while fetching keywords", e))?;

    Ok(ApiResponse::ok(keywords))
}

pub async fn not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}
