//! # Newsroom Core
//!
//! I/O-free logic for Newsroom: data models, dedup-key derivation, the
//! content store abstraction, ingestion and hybrid retrieval algorithms,
//! and vector helpers.
//!
//! No tokio, sqlx, HTTP or browser dependencies live here; the app crate
//! supplies SQLite storage, providers and the extractor.

pub mod dedup;
pub mod embedding;
pub mod ingest;
pub mod models;
pub mod search;
pub mod store;
