//! Planlens Analyzer - PostgreSQL EXPLAIN plan ingestion and analysis
//!
//! This crate is the data core of an EXPLAIN plan visualizer. It provides:
//! - Source normalization (table frames, quoting, line continuations)
//! - Parsing of EXPLAIN output in text and JSON formats
//! - An enrichment pass computing exclusive costs and durations, planner
//!   estimate factors, per-buffer-class counters and tree-wide maxima

pub mod explain;

pub use explain::*;
