//! # github-trend
//!
//! Collects popular GitHub repositories into a local metadata store and a
//! vector index, then serves semantic search, question answering and
//! trend analytics over them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  GitHub API │──▶│  Discovery  │──▶│   SQLite     │
//! │ (rate-lim.) │   │  (windows)  │   │  metadata    │
//! └──────┬──────┘   └─────────────┘   └──────┬───────┘
//!        │          ┌─────────────┐          │
//!        └─────────▶│ Enrichment  │──▶ vector store + mapping
//!                   └─────────────┘          │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │ (gtrend) │         │   API    │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gtrend init
//! gtrend discover --start 2024-01-01 --end 2024-03-31
//! gtrend enrich --since 2024-01-01
//! gtrend search "vector database written in rust"
//! gtrend ask "which async runtimes are gaining stars?"
//! gtrend serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`github`] | Rate-limited GitHub REST client |
//! | [`discover`] | Windowed repository discovery |
//! | [`enrich`] | README, contributors, star history, vector write |
//! | [`metadata`] | Repositories, contributors, ingest log, mapping |
//! | [`embedding`] | Embedding providers with zero-vector fallback |
//! | [`vector_store`] | SQLite vector backend and backend selection |
//! | [`qdrant`] | Qdrant backend (`qdrant-client`) |
//! | [`retrieval`] | Semantic search joined with metadata |
//! | [`answer`] | Question answering over retrieved repositories |
//! | [`analytics`] | Chart data: years, languages, topics, communities |
//! | [`server`] | HTTP JSON API |

pub mod analytics;
pub mod answer;
pub mod commands;
pub mod completion;
pub mod config;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod enrich;
pub mod github;
pub mod metadata;
pub mod migrate;
pub mod progress;
pub mod qdrant;
pub mod retrieval;
pub mod server;
pub mod stats;
pub mod vector_store;

pub use github_trend_core as core;
