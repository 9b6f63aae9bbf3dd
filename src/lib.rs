//! # docsift
//!
//! Incremental ingestion of documents from polled sources into a keyword
//! index and a namespaced vector index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────────┐   ┌──────────┐   ┌──────────────┐
//! │ Connectors  │──▶│ IngestionQueue │──▶│ Indexer  │──▶│ LexicalIndex │
//! │ (pollers)   │   │  (bounded)     │   │ (single  │   └──────────────┘
//! └─────┬───────┘   └────────────────┘   │ consumer)│   ┌──────────────┐
//!       │ watermark                      │          │──▶│ VectorIndex  │
//!       ▼                                └────┬─────┘   │ local/remote │
//!  ┌──────────┐                               │         └──────────────┘
//!  │Watermarks│                        EmbeddingProvider
//!  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sift init                       # create database
//! sift sync all                   # one fetch cycle per source
//! sift run                        # poll continuously until Ctrl-C
//! sift search "deployment" --mode hybrid
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Documents, watermarks, vector entries |
//! | [`queue`] | Bounded ingestion queue |
//! | [`watermark`] | Per-source watermark stores |
//! | [`identity`] | Document id → numeric id registry |
//! | [`lexical`] | BM25 keyword index |
//! | [`embedding`] | Embedding providers |
//! | [`vector`] | Namespaced vector index and backends |
//! | [`indexer`] | Writes documents to both indices |
//! | [`connector`] | Source connector contract and filesystem source |
//! | [`poller`] | Fetch-and-enqueue cycles |
//! | [`pipeline`] | Task wiring |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`app`] | Stack construction from config |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`ingest`] | `sync`, `run`, `remove`, `clear` commands |
//! | [`sources`] | `sources` command |
//! | [`stats`] | `status` command |
//! | [`logging`] | Tracing subscriber setup |

pub mod app;
pub mod config;
pub mod connector;
pub mod db;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod indexer;
pub mod ingest;
pub mod lexical;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod search;
pub mod sources;
pub mod stats;
pub mod vector;
pub mod watermark;
