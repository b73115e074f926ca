//! # Scholar Core
//!
//! Shared, backend-free logic for Scholar: data models, the error
//! taxonomy, text chunking, entity extraction, the vector-index /
//! graph-store / document-ledger abstractions with in-memory reference
//! implementations, the hybrid retrieval algorithm, and prompt
//! composition with citation tracking.
//!
//! This crate contains no tokio runtime, sqlx, network I/O, or other
//! native-only dependencies. The application crate supplies SQLite
//! backends and the HTTP embedding/LLM gateways.

pub mod chunk;
pub mod compose;
pub mod error;
pub mod extract;
pub mod graph;
pub mod index;
pub mod ledger;
pub mod models;
pub mod retrieve;
