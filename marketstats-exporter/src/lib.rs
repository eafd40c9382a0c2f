//! Prometheus exporter for Golem network and CoinMarketCap statistics.
//!
//! Every scrape of the `/metrics` endpoint runs the enabled collectors. Each
//! collector reads its upstream JSON API through a TTL cache, turns the
//! records into labelled metric families and hands them back for rendering.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Upstream API │───>│ResponseCache │───>│  Collectors  │───>│ HTTP Server  │
//! │   (reqwest)  │    │  (TTL, LRU)  │    │  (families)  │    │  (/metrics)  │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! marketstats-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod cache;
pub mod collector;
pub mod config;
pub mod exporter;
pub mod extract;
pub mod family;
pub mod http;
pub mod json;
pub mod labels;
pub mod naming;
pub mod source;
pub mod upstream;

pub use cache::ResponseCache;
pub use collector::{CollectError, Collector};
pub use config::ExporterConfig;
pub use exporter::{Exporter, Pipeline, ScrapeError, SharedExporter, build_pipeline};
pub use http::HttpServer;
pub use upstream::{Fetcher, UpstreamClient, UpstreamError};
