#![deny(missing_docs)]

//! Core library for the streaming product ingestion pipeline.

/// HTTP status routes.
pub mod api;
/// Local summary backups of processed records.
pub mod backup;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Vision labeling of product images.
pub mod labeling;
/// Structured logging and tracing setup.
pub mod logging;
/// Concurrent ingestion pipeline.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;
/// JSON run reports.
pub mod report;
/// Raw record sources.
pub mod source;
/// Run statistics.
pub mod stats;
/// Vector store contract.
pub mod vector_store;
