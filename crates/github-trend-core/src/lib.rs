//! # github-trend core
//!
//! Pure domain logic shared by the ingestion pipeline, the retrieval
//! service, and the analytics layer: repository records, discovery
//! windows, star-history bucketing, README normalization, deterministic
//! vector identifiers, the vector store abstraction, and topic-graph
//! community detection.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Everything
//! that talks to the network or the database lives in the `github-trend`
//! application crate.

pub mod embedding;
pub mod graph;
pub mod markdown;
pub mod models;
pub mod star_history;
pub mod store;
pub mod window;
