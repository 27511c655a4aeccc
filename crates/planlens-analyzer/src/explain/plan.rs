//! Query Plan Model - Data structures for representing EXPLAIN output
//!
//! This module defines the plan tree produced by the parsers and consumed by
//! the enrichment pass. Field names are serialized under the exact key names
//! PostgreSQL uses in `EXPLAIN (FORMAT JSON)` output, so a parsed plan can be
//! re-serialized into a document PostgreSQL tooling understands. Attributes
//! without a dedicated field land in the flattened `extra` map of the struct
//! they belong to.
//!
//! Fields filled in by the enrichment pass (`node_id`, exclusive metrics,
//! planner estimate, revised row counters, maxima) are skipped during
//! serialization: re-serializing an enriched plan yields the original
//! attribute set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A fully parsed and enriched EXPLAIN plan
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Plan {
    /// Unique identifier, `plan_` followed by a UUID
    pub id: String,
    /// Display name, defaults to a creation-date label
    pub name: String,
    /// Creation timestamp
    pub created_on: DateTime<Utc>,
    /// The SQL query this plan was obtained for, if known
    pub query: String,
    /// The plan body: root node, triggers, JIT, settings, timings
    pub content: PlanContent,
    /// CTE subtrees relocated out of the main tree during enrichment
    pub ctes: Vec<PlanNode>,
    /// True when the plan carries actual measurements (EXPLAIN ANALYZE)
    pub is_analyze: bool,
    /// True when any node carries an `Output` attribute (EXPLAIN VERBOSE)
    pub is_verbose: bool,
}

impl Plan {
    /// Returns a pre-order iterator over all nodes: the main tree first,
    /// then each relocated CTE subtree.
    pub fn iter_nodes(&self) -> PlanNodeIterator<'_> {
        PlanNodeIterator::with_ctes(&self.content.plan, &self.ctes)
    }

    /// Total number of nodes, relocated CTE subtrees included
    pub fn node_count(&self) -> usize {
        self.iter_nodes().count()
    }

    /// Execution time in milliseconds, if the plan carries one.
    ///
    /// Falls back from `Execution Time` to the pre-9.5 `Total Runtime`
    /// attribute, then to the root node's (scaled) actual total time.
    pub fn execution_time(&self) -> Option<f64> {
        self.content
            .execution_time
            .or(self.content.total_runtime)
            .or(self.content.plan.actual_total_time)
    }

    /// Planning time in milliseconds, if the plan carries one
    pub fn planning_time(&self) -> Option<f64> {
        self.content.planning_time
    }
}

/// The plan body: the node tree plus everything PostgreSQL reports alongside
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanContent {
    /// Root node of the plan tree
    #[serde(rename = "Plan")]
    pub plan: PlanNode,

    /// Per-trigger timing entries (EXPLAIN ANALYZE on DML)
    #[serde(rename = "Triggers", skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<Trigger>>,

    /// Top-level JIT compilation block
    #[serde(rename = "JIT", skip_serializing_if = "Option::is_none")]
    pub jit: Option<Jit>,

    /// Non-default settings reported by EXPLAIN (SETTINGS)
    #[serde(rename = "Settings", skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,

    #[serde(rename = "Planning Time", skip_serializing_if = "Option::is_none")]
    pub planning_time: Option<f64>,

    #[serde(rename = "Execution Time", skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,

    /// Execution time as reported by PostgreSQL releases before 9.5
    #[serde(rename = "Total Runtime", skip_serializing_if = "Option::is_none")]
    pub total_runtime: Option<f64>,

    /// Query text embedded in the plan (auto_explain output)
    #[serde(rename = "Query Text", skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,

    /// Attributes without a dedicated field
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Largest actual row count across the tree
    #[serde(skip)]
    pub max_rows: Option<u64>,

    /// Largest exclusive cost across the tree
    #[serde(skip)]
    pub max_cost: Option<f64>,

    /// Largest total cost across the tree
    #[serde(skip)]
    pub max_total_cost: Option<f64>,

    /// Largest exclusive duration across the tree
    #[serde(skip)]
    pub max_duration: Option<f64>,

    /// Largest per-class exclusive buffer sums across the tree
    #[serde(skip)]
    pub max_blocks: MaxBlocks,
}

/// A single node of the plan tree
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanNode {
    /// Operation performed by this node. Text-format plans keep the whole
    /// header (e.g. `Seq Scan on users`), JSON plans carry the bare type.
    #[serde(rename = "Node Type")]
    pub node_type: String,

    // Planner estimates
    #[serde(rename = "Startup Cost", skip_serializing_if = "Option::is_none")]
    pub startup_cost: Option<f64>,
    #[serde(rename = "Total Cost", skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(rename = "Plan Rows", skip_serializing_if = "Option::is_none")]
    pub plan_rows: Option<u64>,
    #[serde(rename = "Plan Width", skip_serializing_if = "Option::is_none")]
    pub plan_width: Option<u32>,

    // Measurements from EXPLAIN ANALYZE. Times are per-loop until the
    // enrichment pass rescales them.
    #[serde(
        rename = "Actual Startup Time",
        skip_serializing_if = "Option::is_none"
    )]
    pub actual_startup_time: Option<f64>,
    #[serde(rename = "Actual Total Time", skip_serializing_if = "Option::is_none")]
    pub actual_total_time: Option<f64>,
    #[serde(rename = "Actual Rows", skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<u64>,
    #[serde(rename = "Actual Loops", skip_serializing_if = "Option::is_none")]
    pub actual_loops: Option<u64>,

    /// How this node relates to its parent (`Outer`, `Inner`, `Member`,
    /// `InitPlan`, `SubPlan`, ...)
    #[serde(
        rename = "Parent Relationship",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_relationship: Option<String>,

    /// Name of the enclosing Sub/InitPlan; starts with `CTE ` for CTEs
    #[serde(rename = "Subplan Name", skip_serializing_if = "Option::is_none")]
    pub subplan_name: Option<String>,

    #[serde(rename = "Workers Planned", skip_serializing_if = "Option::is_none")]
    pub workers_planned: Option<u64>,
    #[serde(rename = "Workers Launched", skip_serializing_if = "Option::is_none")]
    pub workers_launched: Option<u64>,

    #[serde(
        rename = "Rows Removed by Filter",
        skip_serializing_if = "Option::is_none"
    )]
    pub rows_removed_by_filter: Option<u64>,
    #[serde(
        rename = "Rows Removed by Join Filter",
        skip_serializing_if = "Option::is_none"
    )]
    pub rows_removed_by_join_filter: Option<u64>,

    // Sort block
    #[serde(rename = "Sort Method", skip_serializing_if = "Option::is_none")]
    pub sort_method: Option<String>,
    #[serde(rename = "Sort Space Used", skip_serializing_if = "Option::is_none")]
    pub sort_space_used: Option<u64>,
    #[serde(rename = "Sort Space Type", skip_serializing_if = "Option::is_none")]
    pub sort_space_type: Option<SortSpaceType>,

    // Incremental sort groups
    #[serde(rename = "Full-sort Groups", skip_serializing_if = "Option::is_none")]
    pub full_sort_groups: Option<SortGroups>,
    #[serde(rename = "Pre-sorted Groups", skip_serializing_if = "Option::is_none")]
    pub pre_sorted_groups: Option<SortGroups>,

    #[serde(rename = "Sort Key", default, skip_serializing_if = "Vec::is_empty")]
    pub sort_key: Vec<String>,
    #[serde(
        rename = "Presorted Key",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub presorted_key: Vec<String>,

    // Buffer counters (EXPLAIN BUFFERS)
    #[serde(rename = "Shared Hit Blocks", skip_serializing_if = "Option::is_none")]
    pub shared_hit_blocks: Option<u64>,
    #[serde(rename = "Shared Read Blocks", skip_serializing_if = "Option::is_none")]
    pub shared_read_blocks: Option<u64>,
    #[serde(
        rename = "Shared Dirtied Blocks",
        skip_serializing_if = "Option::is_none"
    )]
    pub shared_dirtied_blocks: Option<u64>,
    #[serde(
        rename = "Shared Written Blocks",
        skip_serializing_if = "Option::is_none"
    )]
    pub shared_written_blocks: Option<u64>,
    #[serde(rename = "Local Hit Blocks", skip_serializing_if = "Option::is_none")]
    pub local_hit_blocks: Option<u64>,
    #[serde(rename = "Local Read Blocks", skip_serializing_if = "Option::is_none")]
    pub local_read_blocks: Option<u64>,
    #[serde(
        rename = "Local Dirtied Blocks",
        skip_serializing_if = "Option::is_none"
    )]
    pub local_dirtied_blocks: Option<u64>,
    #[serde(
        rename = "Local Written Blocks",
        skip_serializing_if = "Option::is_none"
    )]
    pub local_written_blocks: Option<u64>,
    #[serde(rename = "Temp Hit Blocks", skip_serializing_if = "Option::is_none")]
    pub temp_hit_blocks: Option<u64>,
    #[serde(rename = "Temp Read Blocks", skip_serializing_if = "Option::is_none")]
    pub temp_read_blocks: Option<u64>,
    #[serde(
        rename = "Temp Dirtied Blocks",
        skip_serializing_if = "Option::is_none"
    )]
    pub temp_dirtied_blocks: Option<u64>,
    #[serde(
        rename = "Temp Written Blocks",
        skip_serializing_if = "Option::is_none"
    )]
    pub temp_written_blocks: Option<u64>,

    // WAL counters (EXPLAIN WAL)
    #[serde(rename = "WAL Records", skip_serializing_if = "Option::is_none")]
    pub wal_records: Option<u64>,
    #[serde(rename = "WAL Bytes", skip_serializing_if = "Option::is_none")]
    pub wal_bytes: Option<u64>,
    #[serde(rename = "WAL FPI", skip_serializing_if = "Option::is_none")]
    pub wal_fpi: Option<u64>,

    // I/O timings (track_io_timing)
    #[serde(rename = "I/O Read Time", skip_serializing_if = "Option::is_none")]
    pub io_read_time: Option<f64>,
    #[serde(rename = "I/O Write Time", skip_serializing_if = "Option::is_none")]
    pub io_write_time: Option<f64>,

    /// Per-worker statistics for parallel nodes
    #[serde(rename = "Workers", default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<Worker>,

    /// Child nodes
    #[serde(rename = "Plans", default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<PlanNode>,

    /// Attributes without a dedicated field (`Filter`, `Output`,
    /// `Index Cond`, `Hash Cond`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    // Everything below is filled in by the enrichment pass.
    /// Pre-order position in the enriched tree, starting at 1
    #[serde(skip)]
    pub node_id: Option<u32>,

    /// This node's own cost: total cost minus non-InitPlan children, >= 0
    #[serde(skip)]
    pub exclusive_cost: Option<f64>,

    /// This node's own duration: scaled total time minus non-InitPlan
    /// children, >= 0
    #[serde(skip)]
    pub exclusive_duration: Option<f64>,

    /// How far off the planner's row estimate was, >= 1 when defined
    #[serde(skip)]
    pub planner_estimate_factor: Option<f64>,

    #[serde(skip)]
    pub planner_estimate_direction: EstimateDirection,

    /// Workers planned by the nearest Gather ancestor
    #[serde(skip)]
    pub workers_planned_by_gather: Option<u64>,

    /// Row counters multiplied by the loop count
    #[serde(skip)]
    pub actual_rows_revised: Option<u64>,
    #[serde(skip)]
    pub plan_rows_revised: Option<u64>,
    #[serde(skip)]
    pub rows_removed_by_filter_revised: Option<u64>,
    #[serde(skip)]
    pub rows_removed_by_join_filter_revised: Option<u64>,

    /// Exclusive buffer and I/O timing counters
    #[serde(skip)]
    pub exclusive: ExclusiveCounters,
}

impl PlanNode {
    /// Creates a node with the given type and everything else unset
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    /// Returns the total number of nodes in this subtree (including self)
    pub fn node_count(&self) -> usize {
        1 + self.plans.iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// Returns the maximum depth of this subtree
    pub fn depth(&self) -> usize {
        1 + self
            .plans
            .iter()
            .map(|c| c.depth())
            .max()
            .unwrap_or_default()
    }

    /// Returns true if this is a leaf node (no children)
    pub fn is_leaf(&self) -> bool {
        self.plans.is_empty()
    }

    /// Returns an iterator over this subtree, pre-order
    pub fn iter(&self) -> PlanNodeIterator<'_> {
        PlanNodeIterator::new(self)
    }

    /// Looks up a per-worker entry by worker number
    pub fn worker(&self, number: u64) -> Option<&Worker> {
        self.workers.iter().find(|w| w.worker_number == number)
    }
}

/// Per-worker statistics attached to a parallel plan node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    #[serde(rename = "Worker Number")]
    pub worker_number: u64,

    #[serde(
        rename = "Actual Startup Time",
        skip_serializing_if = "Option::is_none"
    )]
    pub actual_startup_time: Option<f64>,
    #[serde(rename = "Actual Total Time", skip_serializing_if = "Option::is_none")]
    pub actual_total_time: Option<f64>,
    #[serde(rename = "Actual Rows", skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<u64>,
    #[serde(rename = "Actual Loops", skip_serializing_if = "Option::is_none")]
    pub actual_loops: Option<u64>,

    /// Worker-local JIT block
    #[serde(rename = "JIT", skip_serializing_if = "Option::is_none")]
    pub jit: Option<Jit>,

    /// Ad-hoc worker properties (`Sort Method`, buffer counters, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One trigger timing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    #[serde(rename = "Trigger Name")]
    pub trigger_name: String,

    #[serde(rename = "Relation", skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,

    /// Total time spent in this trigger, milliseconds
    #[serde(rename = "Time", skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,

    #[serde(rename = "Calls", skip_serializing_if = "Option::is_none")]
    pub calls: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// JIT compilation block, attached to the plan root or a worker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Jit {
    #[serde(rename = "Functions", skip_serializing_if = "Option::is_none")]
    pub functions: Option<u64>,

    /// JIT options (`Inlining`, `Optimization`, ...), values are JSON scalars
    #[serde(rename = "Options", skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,

    /// JIT phase timings in milliseconds
    #[serde(rename = "Timing", skip_serializing_if = "Option::is_none")]
    pub timing: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a sort spilled: in memory or on disk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortSpaceType {
    Memory,
    Disk,
}

/// Group statistics reported by Incremental Sort nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SortGroups {
    #[serde(rename = "Group Count")]
    pub group_count: u64,

    #[serde(
        rename = "Sort Methods Used",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sort_methods_used: Vec<String>,

    #[serde(rename = "Sort Space Memory", skip_serializing_if = "Option::is_none")]
    pub sort_space_memory: Option<SortSpace>,

    #[serde(rename = "Sort Space Disk", skip_serializing_if = "Option::is_none")]
    pub sort_space_disk: Option<SortSpace>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Average and peak sort space, in kilobytes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpace {
    #[serde(rename = "Average Sort Space Used")]
    pub average_sort_space_used: u64,

    #[serde(rename = "Peak Sort Space Used")]
    pub peak_sort_space_used: u64,
}

/// Whether the planner over- or under-estimated a node's row count
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EstimateDirection {
    Over,
    Under,
    #[default]
    None,
}

/// Exclusive (self minus children) buffer and I/O counters, filled in by the
/// enrichment pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExclusiveCounters {
    pub shared_hit_blocks: Option<u64>,
    pub shared_read_blocks: Option<u64>,
    pub shared_dirtied_blocks: Option<u64>,
    pub shared_written_blocks: Option<u64>,
    pub local_hit_blocks: Option<u64>,
    pub local_read_blocks: Option<u64>,
    pub local_dirtied_blocks: Option<u64>,
    pub local_written_blocks: Option<u64>,
    pub temp_hit_blocks: Option<u64>,
    pub temp_read_blocks: Option<u64>,
    pub temp_dirtied_blocks: Option<u64>,
    pub temp_written_blocks: Option<u64>,
    pub io_read_time: Option<f64>,
    pub io_write_time: Option<f64>,
}

impl ExclusiveCounters {
    /// Sum of the four shared-buffer counters
    pub fn shared_total(&self) -> u64 {
        [
            self.shared_hit_blocks,
            self.shared_read_blocks,
            self.shared_dirtied_blocks,
            self.shared_written_blocks,
        ]
        .into_iter()
        .flatten()
        .sum()
    }

    /// Sum of the four local-buffer counters
    pub fn local_total(&self) -> u64 {
        [
            self.local_hit_blocks,
            self.local_read_blocks,
            self.local_dirtied_blocks,
            self.local_written_blocks,
        ]
        .into_iter()
        .flatten()
        .sum()
    }

    /// Sum of the temp-buffer counters (PostgreSQL reports read and written)
    pub fn temp_total(&self) -> u64 {
        [self.temp_read_blocks, self.temp_written_blocks]
            .into_iter()
            .flatten()
            .sum()
    }
}

/// Largest per-class exclusive buffer sums across the tree. An entry is
/// `None` when the class never appears or its maximum is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxBlocks {
    pub shared: Option<u64>,
    pub temp: Option<u64>,
    pub local: Option<u64>,
}

/// Iterator traversing plan nodes pre-order
pub struct PlanNodeIterator<'a> {
    stack: Vec<&'a PlanNode>,
}

impl<'a> PlanNodeIterator<'a> {
    fn new(root: &'a PlanNode) -> Self {
        Self { stack: vec![root] }
    }

    fn with_ctes(root: &'a PlanNode, ctes: &'a [PlanNode]) -> Self {
        // Reverse so the main tree pops first, then CTEs in order
        let mut stack: Vec<&'a PlanNode> = ctes.iter().rev().collect();
        stack.push(root);
        Self { stack }
    }
}

impl<'a> Iterator for PlanNodeIterator<'a> {
    type Item = &'a PlanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push children in reverse order so we visit them in order
        for child in node.plans.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}
