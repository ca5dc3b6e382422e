//! Core library: ingestion, chunking, embeddings, vector index, analysis and
//! the scan orchestrator that ties them together.

pub mod analysis;
pub mod cancel;
pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod models;
pub mod pipeline;
pub mod scanner;
pub mod source;
pub mod vectorstore;

pub use cancel::CancelToken;
pub use models::{Finding, FindingKind, ScanResult, ScanStatus, Severity};
pub use pipeline::{ScanOrchestrator, ScanRequest};
pub use source::ScanSource;
