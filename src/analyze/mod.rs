// src/analyze/mod.rs
pub mod dedup;
pub mod scoring;
pub mod tagging;
