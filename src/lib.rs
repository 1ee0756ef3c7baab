//! # product-search
//!
//! A product search service in front of an OpenSearch index: instant
//! search, autocomplete and full search with optional LLM reranking, plus
//! image-based product extraction and a mailbox ingestor that turns
//! product-request emails into catalogue matches.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum) ──► SearchClient ──► dyn SearchEngine ──► OpenSearch | tantivy
//!        │               │
//!        │               └──► llm::rerank (0-100 per hit, degrades to no-op)
//!        ├──► indexer ──► SearchEngine (validate, then write; invalidates cache)
//!        ├──► llm::vision (image -> product fields)
//!        ├──► matcher (full search candidates -> llm::rerank against request)
//!        └──► mail::EmailIngestor (IMAP -> mail-parser -> llm::extract -> matcher)
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for engine, LLM, mailbox and cache
//! - [`error`] - `AppError` taxonomy and its JSON error response
//! - [`models`] - Products, search results, suggestions and request/response types
//! - [`engine`] - The `SearchEngine` trait with OpenSearch and embedded tantivy backends
//! - [`cache`] - Moka-backed result cache keyed by query mode, text, size and rerank flag
//! - [`search`] - Search Client: the three query modes, caching and rerank fallback
//! - [`llm`] - Chat-completion client, reranker, vision extraction and email request extraction
//! - [`indexer`] - Product validation plus single, bulk and recreate operations
//! - [`matcher`] - Retrieval-then-rerank matching of structured product requests
//! - [`mail`] - IMAP client and the serialized email polling pipeline
//! - [`api`] - Axum HTTP handlers and router
//! - [`state`] - Shared application state

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod mail;
pub mod matcher;
pub mod models;
pub mod search;
pub mod state;
