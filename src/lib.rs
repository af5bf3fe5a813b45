//! # docsearch
//!
//! Upload documents, embed them, and find the closest ones to a query.
//!
//! docsearch accepts plain text, PDF, DOCX and PPTX files over HTTP (or the
//! CLI), extracts their text, splits it into chunks, embeds every chunk and
//! stores documents and vectors in SQLite. Queries are embedded with the
//! same model and answered by a squared L2 scan over the stored vectors.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ HTTP / CLI  │──▶│ Extract+Chunk+Embed  │──▶│  SQLite   │
//! │  uploads    │   │                      │   │ docs+vecs │
//! └─────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                   │
//!                         ┌─────────────────────────┤
//!                         ▼                         ▼
//!                    ┌──────────┐             ┌──────────┐
//!                    │  /query  │             │ /database│
//!                    └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsearch init                       # create database
//! docsearch ingest notes.txt deck.pptx # ingest local files
//! docsearch query "deployment"         # nearest documents
//! docsearch serve                      # start HTTP server on :8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from uploaded files |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding model abstraction and providers |
//! | [`store`] | Document and vector persistence |
//! | [`ingest`] | Upload pipeline |
//! | [`search`] | Semantic query |
//! | [`embed_cmd`] | Re-embedding after a model change |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod store;

#[cfg(test)]
mod test_logs;
