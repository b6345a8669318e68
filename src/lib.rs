//! # Newsroom
//!
//! Feed ingestion, article extraction, AI enrichment and hybrid search over
//! a news corpus, served as a CLI and an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌────────────┐
//! │  Feeds   │──▶│  Ingest   │──▶│  SQLite  │◀──│  Extract   │
//! │ RSS/Atom │   │  + dedup  │   │          │   │  (Chrome)  │
//! └──────────┘   └───────────┘   └────┬─────┘   └────────────┘
//!                                     │  ▲
//!                      ┌──────────────┤  └──── Enrich (summary, embed,
//!                      ▼              ▼              translate)
//!                 ┌──────────┐   ┌──────────┐
//!                 │   CLI    │   │   HTTP   │   Scheduler ─▶ batch jobs
//!                 └──────────┘   └──────────┘
//! ```
//!
//! Provider-independent pieces (data model, dedup keys, the [`Store`]
//! trait and the retrieval algorithm) live in `newsroom-core`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`feed`] | RSS/Atom fetching and parsing |
//! | [`ingest`] | Per-source refresh |
//! | [`extract`] | Headless-browser article extraction |
//! | [`crawl`] | Crawl statuses and the crawl backlog |
//! | [`ai`] | Provider backends, prompts, summary/embed/translate/rerank |
//! | [`enrich`] | Enrichment, embedding backfill, document translation |
//! | [`search`] | Query embedding and hybrid retrieval |
//! | [`tasks`] / [`scheduler`] | Scheduled jobs and the cron registry |
//! | [`server`] | HTTP API |
//! | [`settings`] | Models, role assignments, proxy |
//! | [`db`] / [`migrate`] | Database connection and schema |
//!
//! [`Store`]: newsroom_core::store::Store

pub mod ai;
pub mod config;
pub mod context;
pub mod crawl;
pub mod db;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod feed;
pub mod ingest;
pub mod migrate;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod settings;
pub mod sources;
pub mod sqlite_store;
pub mod storage;
pub mod tasks;
pub mod transport;
