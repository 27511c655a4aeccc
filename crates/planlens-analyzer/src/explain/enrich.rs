//! Enrichment pass - derived metrics over the parsed tree
//!
//! A single recursive walk assigns pre-order node ids, evaluates the
//! planner's row estimates, propagates planned worker counts below Gather
//! nodes, relocates CTE subtrees, rescales per-loop actual times, and
//! computes exclusive (self minus children) costs, durations and buffer
//! counters. A final scan records the tree-wide maxima consumers scale
//! their displays against.
//!
//! PostgreSQL reports actual times per loop, and per worker under a
//! Gather; rescaling happens before exclusive durations are derived so
//! parent and child totals are comparable.

use std::cmp::Ordering;

use tracing::debug;

use super::plan::{EstimateDirection, ExclusiveCounters, MaxBlocks, PlanContent, PlanNode};

/// Runs the enrichment pass in place and returns the relocated CTE roots.
pub(crate) fn enrich(content: &mut PlanContent) -> Vec<PlanNode> {
    let mut ctes = Vec::new();
    let mut next_id = 1;
    process_node(&mut content.plan, &mut ctes, &mut next_id);
    if !ctes.is_empty() {
        debug!(count = ctes.len(), "relocated CTE subtrees");
    }
    calculate_maximums(content, &ctes);
    ctes
}

fn process_node(node: &mut PlanNode, ctes: &mut Vec<PlanNode>, next_id: &mut u32) {
    calculate_planner_estimate(node);
    node.node_id = Some(*next_id);
    *next_id += 1;

    // A planned count of zero is an explicit "no parallelism" and wins
    // over anything inherited from further up.
    let inherited = node.workers_planned.or(node.workers_planned_by_gather);
    for child in &mut node.plans {
        if !is_init_or_subplan(child) {
            child.workers_planned_by_gather = inherited;
        }
        process_node(child, ctes, next_id);
    }

    // CTE subtrees move to the plan root once their own metrics are done
    let mut index = 0;
    while index < node.plans.len() {
        if is_cte(&node.plans[index]) {
            ctes.push(node.plans.remove(index));
        } else {
            index += 1;
        }
    }

    calculate_actuals(node);
    calculate_exclusives(node);
}

fn is_init_or_subplan(node: &PlanNode) -> bool {
    matches!(
        node.parent_relationship.as_deref(),
        Some("InitPlan") | Some("SubPlan")
    )
}

fn is_cte(node: &PlanNode) -> bool {
    node.parent_relationship.as_deref() == Some("InitPlan")
        && node
            .subplan_name
            .as_deref()
            .is_some_and(|name| name.starts_with("CTE "))
}

/// How far off the planner's row estimate was. The factor is the larger
/// count over the smaller one, floored at a divisor of 1 so a zero on one
/// side still yields a usable ratio; with zero rows on both sides there is
/// nothing to compare.
fn calculate_planner_estimate(node: &mut PlanNode) {
    let (Some(actual), Some(planned)) = (node.actual_rows, node.plan_rows) else {
        return;
    };
    node.planner_estimate_direction = match actual.cmp(&planned) {
        Ordering::Greater => EstimateDirection::Under,
        Ordering::Less => EstimateDirection::Over,
        Ordering::Equal => EstimateDirection::None,
    };
    if actual == 0 && planned == 0 {
        return;
    }
    let factor = actual.max(planned) as f64 / actual.min(planned).max(1) as f64;
    node.planner_estimate_factor = Some(factor);
}

/// Rescales per-loop times to wall-clock contributions and derives the
/// exclusive duration. InitPlan children run outside their parent's
/// measured time and stay out of the subtraction.
fn calculate_actuals(node: &mut PlanNode) {
    if let Some(total) = node.actual_total_time {
        let loops = node.actual_loops.unwrap_or(1) as f64;
        let workers = (node.workers_planned_by_gather.unwrap_or(0) + 1) as f64;
        let scaled_total = total * loops / workers;
        node.actual_total_time = Some(scaled_total);
        if let Some(startup) = node.actual_startup_time {
            node.actual_startup_time = Some(startup * loops / workers);
        }
        let children: f64 = node
            .plans
            .iter()
            .filter(|child| child.parent_relationship.as_deref() != Some("InitPlan"))
            .filter_map(|child| child.actual_total_time)
            .sum();
        node.exclusive_duration = Some((scaled_total - children).max(0.0));
    }

    let loops = node.actual_loops.unwrap_or(1).max(1);
    node.actual_rows_revised = node.actual_rows.map(|rows| rows.saturating_mul(loops));
    node.plan_rows_revised = node.plan_rows.map(|rows| rows.saturating_mul(loops));
    node.rows_removed_by_filter_revised = node
        .rows_removed_by_filter
        .map(|rows| rows.saturating_mul(loops));
    node.rows_removed_by_join_filter_revised = node
        .rows_removed_by_join_filter
        .map(|rows| rows.saturating_mul(loops));
}

fn calculate_exclusives(node: &mut PlanNode) {
    if let Some(total) = node.total_cost {
        let children: f64 = node
            .plans
            .iter()
            .filter(|child| child.parent_relationship.as_deref() != Some("InitPlan"))
            .filter_map(|child| child.total_cost)
            .sum();
        node.exclusive_cost = Some((total - children).max(0.0));
    }

    let exclusive = ExclusiveCounters {
        shared_hit_blocks: exclusive_u64(node, |n| n.shared_hit_blocks),
        shared_read_blocks: exclusive_u64(node, |n| n.shared_read_blocks),
        shared_dirtied_blocks: exclusive_u64(node, |n| n.shared_dirtied_blocks),
        shared_written_blocks: exclusive_u64(node, |n| n.shared_written_blocks),
        local_hit_blocks: exclusive_u64(node, |n| n.local_hit_blocks),
        local_read_blocks: exclusive_u64(node, |n| n.local_read_blocks),
        local_dirtied_blocks: exclusive_u64(node, |n| n.local_dirtied_blocks),
        local_written_blocks: exclusive_u64(node, |n| n.local_written_blocks),
        temp_hit_blocks: exclusive_u64(node, |n| n.temp_hit_blocks),
        temp_read_blocks: exclusive_u64(node, |n| n.temp_read_blocks),
        temp_dirtied_blocks: exclusive_u64(node, |n| n.temp_dirtied_blocks),
        temp_written_blocks: exclusive_u64(node, |n| n.temp_written_blocks),
        io_read_time: exclusive_f64(node, |n| n.io_read_time),
        io_write_time: exclusive_f64(node, |n| n.io_write_time),
    };
    node.exclusive = exclusive;
}

/// Counter minus the same counter over direct children, when the node
/// carries it at all
fn exclusive_u64(node: &PlanNode, get: impl Fn(&PlanNode) -> Option<u64>) -> Option<u64> {
    let own = get(node)?;
    let children: u64 = node.plans.iter().filter_map(|child| get(child)).sum();
    Some(own.saturating_sub(children))
}

fn exclusive_f64(node: &PlanNode, get: impl Fn(&PlanNode) -> Option<f64>) -> Option<f64> {
    let own = get(node)?;
    let children: f64 = node.plans.iter().filter_map(|child| get(child)).sum();
    Some((own - children).max(0.0))
}

/// Tree-wide maxima, relocated CTE subtrees included
fn calculate_maximums(content: &mut PlanContent, ctes: &[PlanNode]) {
    let mut max_rows: Option<u64> = None;
    let mut max_cost: Option<f64> = None;
    let mut max_total_cost: Option<f64> = None;
    let mut max_duration: Option<f64> = None;
    let mut shared: u64 = 0;
    let mut temp: u64 = 0;
    let mut local: u64 = 0;

    {
        let mut visit = |node: &PlanNode| {
            max_rows = max_u64(max_rows, node.actual_rows);
            max_cost = max_f64(max_cost, node.exclusive_cost);
            max_total_cost = max_f64(max_total_cost, node.total_cost);
            max_duration = max_f64(max_duration, node.exclusive_duration);
            shared = shared.max(node.exclusive.shared_total());
            temp = temp.max(node.exclusive.temp_total());
            local = local.max(node.exclusive.local_total());
        };
        for node in content.plan.iter() {
            visit(node);
        }
        for node in ctes.iter().flat_map(|cte| cte.iter()) {
            visit(node);
        }
    }

    content.max_rows = max_rows;
    content.max_cost = max_cost;
    content.max_total_cost = max_total_cost;
    content.max_duration = max_duration;
    content.max_blocks = MaxBlocks {
        shared: (shared > 0).then_some(shared),
        temp: (temp > 0).then_some(temp),
        local: (local > 0).then_some(local),
    };
}

fn max_u64(current: Option<u64>, candidate: Option<u64>) -> Option<u64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (value, None) | (None, value) => value,
    }
}

fn max_f64(current: Option<f64>, candidate: Option<f64>) -> Option<f64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (value, None) | (None, value) => value,
    }
}
