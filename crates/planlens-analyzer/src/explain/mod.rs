//! EXPLAIN plan ingestion
//!
//! Turns raw PostgreSQL `EXPLAIN` output - text or JSON, framed, quoted or
//! hard-wrapped - into an enriched [`Plan`] tree. Parsing is pure and
//! synchronous: the same source yields a structurally identical plan, only
//! the generated id and creation timestamp differ between calls (both can
//! be pinned through [`PlanOptions`]).
//!
//! # Example
//!
//! ```
//! use planlens_analyzer::explain::parse_source;
//!
//! let plan = parse_source("Seq Scan on users  (cost=0.00..10.50 rows=100 width=36)").unwrap();
//! assert_eq!(plan.content.plan.node_type, "Seq Scan on users");
//! assert_eq!(plan.content.plan.total_cost, Some(10.5));
//! assert!(!plan.is_analyze);
//! ```

mod attrs;
mod enrich;
mod json;
pub mod plan;
mod source;
mod text;

pub use plan::{
    EstimateDirection, ExclusiveCounters, Jit, MaxBlocks, Plan, PlanContent, PlanNode,
    PlanNodeIterator, SortGroups, SortSpace, SortSpaceType, Trigger, Worker,
};
pub use source::cleanup_source;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors that can escape plan ingestion
#[derive(Debug, Error)]
pub enum ExplainError {
    /// The text parser consumed the whole input without finding a plan node
    #[error("unable to parse plan")]
    ParseFailure,

    /// The input was JSON-shaped but the reader rejected it; the underlying
    /// diagnostic carries the position
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A sort-groups line whose kind is neither `Full-sort` nor `Pre-sorted`
    #[error("unsupported sort groups kind: {0}")]
    UnsupportedSortGroupsKind(String),

    /// The parsed attribute tree did not type as a plan
    #[error("invalid plan structure: {0}")]
    InvalidStructure(String),
}

/// Result type for plan ingestion
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Optional metadata for [`parse_source_as`]. `id` and `created_on` exist
/// so tests and callers persisting plans can pin the generated values.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub name: Option<String>,
    pub query: Option<String>,
    pub id: Option<String>,
    pub created_on: Option<DateTime<Utc>>,
}

/// Parses EXPLAIN output into an enriched plan.
///
/// Accepts the text format (optionally framed, quoted or wrapped), the
/// JSON format (duplicate keys included), and JSON embedded in surrounding
/// text.
pub fn parse_source(source: &str) -> Result<Plan> {
    parse_source_as(source, PlanOptions::default())
}

/// Like [`parse_source`], with explicit plan metadata.
pub fn parse_source_as(source: &str, options: PlanOptions) -> Result<Plan> {
    let cleaned = cleanup_source(source);
    let raw = detect_and_parse(&cleaned)?;
    let mut content: PlanContent = serde_json::from_value(raw)
        .map_err(|error| ExplainError::InvalidStructure(error.to_string()))?;

    let is_analyze = content.plan.actual_rows.is_some();
    let ctes = enrich::enrich(&mut content);
    let is_verbose = content
        .plan
        .iter()
        .chain(ctes.iter().flat_map(|cte| cte.iter()))
        .any(|node| node.extra.contains_key("Output"));

    let created_on = options.created_on.unwrap_or_else(Utc::now);
    let id = options
        .id
        .unwrap_or_else(|| format!("plan_{}", Uuid::new_v4()));
    let name = options
        .name
        .unwrap_or_else(|| format!("plan created on {}", created_on.format("%b %e, %Y %H:%M")));
    let query = options
        .query
        .or_else(|| content.query_text.clone())
        .unwrap_or_default();

    Ok(Plan {
        id,
        name,
        created_on,
        query,
        content,
        ctes,
        is_analyze,
        is_verbose,
    })
}

/// Routes cleaned source to the right parser and returns the raw attribute
/// tree both parsers share.
fn detect_and_parse(cleaned: &str) -> Result<Value> {
    if let Ok(value @ (Value::Array(_) | Value::Object(_))) = json::parse_tolerant(cleaned) {
        debug!("detected JSON format");
        return Ok(json::unwrap_envelope(value));
    }
    if let Some(block) = source::extract_bracketed(cleaned) {
        // The block is unambiguously JSON; its syntax errors are fatal
        debug!("detected embedded JSON block");
        let value = json::parse_tolerant(block)?;
        return Ok(json::unwrap_envelope(value));
    }
    debug!("detected text format");
    text::parse_text(cleaned)
}

#[cfg(test)]
mod tests;
