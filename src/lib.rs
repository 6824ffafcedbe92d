// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod http;
pub mod metrics;
pub mod payload;
pub mod pipeline;
pub mod sentiment;
pub mod source_weights;
pub mod store;

// Dedup, tagging and ranking stages
pub mod analyze;

// Adapters, feed/web/API fetchers and the scheduler
pub mod ingest;

pub use crate::api::create_router;
pub use crate::config::Settings;
pub use crate::payload::build_payload;
pub use crate::pipeline::{run_pipeline, PipelineRunner, RunOptions, RunOutcome, RunSummary};
pub use crate::store::SqliteStore;
