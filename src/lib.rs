//! News Sentiment API
//!
//! A read-only JSON API over a store of scraped news articles with
//! pre-computed sentiment. It serves filtered, paginated article listings and
//! aggregate statistics (sentiment distribution, per-source breakdown, daily
//! trends and top keywords) for a dashboard front end.

pub mod config;
pub mod db;
pub mod params;
pub mod routes;
pub mod stats;
