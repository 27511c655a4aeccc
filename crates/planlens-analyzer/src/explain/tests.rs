//! End-to-end tests over the public parsing entry points

use super::*;
use chrono::TimeZone;
use pretty_assertions::assert_eq;
use serde_json::json;

// ============================================================================
// Framed and Decorated Input Tests
// ============================================================================

#[test]
fn test_parses_psql_framed_plan() {
    let source = "+----+\n| QUERY PLAN |\n+----+\n| Seq Scan on t  (cost=0.00..1.00 rows=1 width=4) |\n+----+\n(1 row)\n";

    let plan = parse_source(source).expect("parse failed");

    assert_eq!(plan.content.plan.node_type, "Seq Scan on t");
    assert_eq!(plan.content.plan.total_cost, Some(1.0));
    assert_eq!(plan.content.plan.plan_rows, Some(1));
    assert!(!plan.is_analyze);
}

#[test]
fn test_cleanup_source_is_exposed() {
    let cleaned = cleanup_source("\"Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)\"\n(1 row)\n");

    assert_eq!(cleaned, "Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)\n");
}

// ============================================================================
// Text Format End-to-End Tests
// ============================================================================

#[test]
fn test_analyze_plan_with_sort_and_buffers() {
    let source = r#" Sort  (cost=112.75..115.50 rows=1000 width=12) (actual time=0.100..1.250 rows=1000 loops=1)
   Sort Key: t.a, t.b
   Sort Method: quicksort  Memory: 103kB
   Buffers: shared hit=15
   ->  Seq Scan on t  (cost=0.00..63.25 rows=1000 width=12) (actual time=0.010..0.250 rows=1000 loops=1)
         Buffers: shared hit=15
 Planning Time: 0.150 ms
 Execution Time: 1.500 ms"#;

    let plan = parse_source(source).expect("parse failed");
    let root = &plan.content.plan;

    assert!(plan.is_analyze);
    assert_eq!(root.node_type, "Sort");
    assert_eq!(root.sort_key, vec!["t.a", "t.b"]);
    assert_eq!(root.sort_method.as_deref(), Some("quicksort"));
    assert_eq!(root.sort_space_used, Some(103));
    assert_eq!(root.sort_space_type, Some(SortSpaceType::Memory));
    assert_eq!(root.shared_hit_blocks, Some(15));
    assert_eq!(root.exclusive.shared_hit_blocks, Some(0));
    assert_eq!(root.plans[0].exclusive.shared_hit_blocks, Some(15));
    assert_eq!(root.exclusive_cost, Some(52.25));
    assert_eq!(root.exclusive_duration, Some(1.0));
    assert_eq!(root.planner_estimate_factor, Some(1.0));
    assert_eq!(root.planner_estimate_direction, EstimateDirection::None);
    assert_eq!(plan.planning_time(), Some(0.15));
    assert_eq!(plan.execution_time(), Some(1.5));
    assert_eq!(plan.content.max_blocks.shared, Some(15));
    assert_eq!(plan.content.max_duration, Some(1.0));
}

#[test]
fn test_never_executed_node_reports_zeroes() {
    let source = r#" Nested Loop  (cost=0.00..20.00 rows=1 width=4) (actual time=0.010..0.020 rows=0 loops=1)
   ->  Seq Scan on a  (cost=0.00..1.00 rows=1 width=4) (actual time=0.005..0.010 rows=0 loops=1)
   ->  Index Scan using i on t  (cost=0.00..8.00 rows=1 width=4) (never executed)"#;

    let plan = parse_source(source).expect("parse failed");
    let never = &plan.content.plan.plans[1];

    assert_eq!(never.actual_loops, Some(0));
    assert_eq!(never.actual_rows, Some(0));
    assert_eq!(never.actual_total_time, Some(0.0));
    assert_eq!(never.exclusive_duration, Some(0.0));
}

#[test]
fn test_cte_subtrees_move_to_the_plan() {
    let source = r#" Hash Join  (cost=1.00..3.00 rows=10 width=8) (actual time=0.100..0.500 rows=10 loops=1)
   CTE x
     ->  Seq Scan on src  (cost=0.00..1.00 rows=10 width=4) (actual time=0.010..0.050 rows=10 loops=1)
   ->  CTE Scan on x  (cost=0.00..0.20 rows=10 width=4) (actual time=0.020..0.100 rows=10 loops=1)"#;

    let plan = parse_source(source).expect("parse failed");

    assert_eq!(plan.ctes.len(), 1);
    assert_eq!(plan.ctes[0].node_type, "Seq Scan on src");
    assert_eq!(plan.ctes[0].subplan_name.as_deref(), Some("CTE x"));
    assert_eq!(plan.content.plan.plans.len(), 1);
    assert_eq!(plan.content.plan.plans[0].node_type, "CTE Scan on x");
    // Relocated nodes never linger in the main tree
    assert!(plan.content.plan.iter().all(|node| {
        node.subplan_name.as_deref().is_none_or(|name| !name.starts_with("CTE "))
    }));
}

#[test]
fn test_gather_worker_propagation() {
    let source = r#" Gather  (cost=1000.00..2000.00 rows=4 width=4) (actual time=1.000..50.000 rows=4 loops=1)
   Workers Planned: 3
   Workers Launched: 3
   ->  Parallel Seq Scan on big  (cost=0.00..1000.00 rows=1 width=4) (actual time=0.500..40.000 rows=1 loops=4)"#;

    let plan = parse_source(source).expect("parse failed");
    let scan = &plan.content.plan.plans[0];

    assert_eq!(plan.content.plan.workers_planned, Some(3));
    assert_eq!(scan.workers_planned_by_gather, Some(3));
    // 40ms per loop, 4 loops, shared by 3 workers + leader
    assert_eq!(scan.actual_total_time, Some(40.0));
    assert_eq!(plan.content.plan.exclusive_duration, Some(10.0));
}

#[test]
fn test_node_ids_cover_the_tree_exactly() {
    let source = r#" Hash Join  (cost=1.00..3.00 rows=10 width=8) (actual time=0.100..0.500 rows=10 loops=1)
   CTE x
     ->  Seq Scan on src  (cost=0.00..1.00 rows=10 width=4) (actual time=0.010..0.050 rows=10 loops=1)
   ->  CTE Scan on x  (cost=0.00..0.20 rows=10 width=4) (actual time=0.020..0.100 rows=10 loops=1)
   ->  Hash  (cost=0.50..0.50 rows=10 width=4) (actual time=0.010..0.020 rows=10 loops=1)
         ->  Seq Scan on other  (cost=0.00..0.50 rows=10 width=4) (actual time=0.001..0.010 rows=10 loops=1)"#;

    let plan = parse_source(source).expect("parse failed");

    let mut ids: Vec<u32> = plan.iter_nodes().filter_map(|n| n.node_id).collect();
    ids.sort_unstable();
    let expected: Vec<u32> = (1..=plan.node_count() as u32).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_verbose_output_detection() {
    let source = r#" Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)
   Output: t.a, t.b"#;

    let plan = parse_source(source).expect("parse failed");

    assert!(plan.is_verbose);
    assert!(!plan.is_analyze);
}

// ============================================================================
// JSON Format End-to-End Tests
// ============================================================================

#[test]
fn test_parses_json_envelope() {
    let source = r#"[
        {
            "Plan": {
                "Node Type": "Hash Join",
                "Startup Cost": 1.0,
                "Total Cost": 3.5,
                "Plan Rows": 10,
                "Plan Width": 8,
                "Actual Startup Time": 0.1,
                "Actual Total Time": 0.5,
                "Actual Rows": 10,
                "Actual Loops": 1,
                "Hash Cond": "(a.id = b.id)",
                "Plans": [
                    {
                        "Node Type": "Seq Scan",
                        "Parent Relationship": "Outer",
                        "Startup Cost": 0.0,
                        "Total Cost": 2.0,
                        "Plan Rows": 10,
                        "Plan Width": 4,
                        "Actual Startup Time": 0.05,
                        "Actual Total Time": 0.25,
                        "Actual Rows": 10,
                        "Actual Loops": 1
                    }
                ]
            },
            "Planning Time": 0.2,
            "Execution Time": 0.6
        }
    ]"#;

    let plan = parse_source(source).expect("parse failed");

    assert!(plan.is_analyze);
    assert_eq!(plan.content.plan.node_type, "Hash Join");
    assert_eq!(plan.content.plan.extra["Hash Cond"], json!("(a.id = b.id)"));
    assert_eq!(plan.content.plan.exclusive_cost, Some(1.5));
    assert_eq!(plan.content.planning_time, Some(0.2));
    assert_eq!(plan.execution_time(), Some(0.6));
}

#[test]
fn test_duplicate_workers_keys_merge() {
    let source = r#"[{"Plan": {
        "Node Type": "Gather",
        "Actual Startup Time": 0.1, "Actual Total Time": 1.5,
        "Actual Rows": 10, "Actual Loops": 1,
        "Plans": [{
            "Node Type": "Parallel Seq Scan",
            "Parent Relationship": "Outer",
            "Actual Startup Time": 0.1, "Actual Total Time": 1.0,
            "Actual Rows": 5, "Actual Loops": 2,
            "Workers": [{"Worker Number": 0, "Actual Rows": 4}],
            "Workers": [{"Worker Number": 1, "Actual Rows": 6}]
        }]
    }}]"#;

    let plan = parse_source(source).expect("parse failed");
    let scan = &plan.content.plan.plans[0];

    assert_eq!(scan.workers.len(), 2);
    assert_eq!(scan.workers[0].worker_number, 0);
    assert_eq!(scan.workers[1].actual_rows, Some(6));
}

#[test]
fn test_enriched_plan_reserializes_to_the_same_tree() {
    let source = r#"[{"Plan": {
        "Node Type": "Sort",
        "Startup Cost": 10.0, "Total Cost": 12.5,
        "Plan Rows": 100, "Plan Width": 12,
        "Actual Startup Time": 0.5, "Actual Total Time": 1.25,
        "Actual Rows": 100, "Actual Loops": 1,
        "Sort Key": ["a"],
        "Plans": [{
            "Node Type": "Seq Scan",
            "Parent Relationship": "Outer",
            "Startup Cost": 0.0, "Total Cost": 8.25,
            "Plan Rows": 100, "Plan Width": 12,
            "Actual Startup Time": 0.01, "Actual Total Time": 0.25,
            "Actual Rows": 100, "Actual Loops": 1,
            "Filter": "(x > 1)"
        }]
    }}]"#;

    let first = parse_source(source).expect("parse failed");
    let reserialized = json!({
        "Plan": serde_json::to_value(&first.content.plan).expect("serialize failed")
    })
    .to_string();
    let second = parse_source(&reserialized).expect("reparse failed");

    assert_eq!(first.content.plan, second.content.plan);
    assert_eq!(first.ctes, second.ctes);
}

#[test]
fn test_text_and_json_forms_agree() {
    let text = " Result  (cost=0.00..0.01 rows=1 width=4) (actual time=0.001..0.002 rows=1 loops=1)";
    let json = r#"[{"Plan": {
        "Node Type": "Result",
        "Startup Cost": 0.00, "Total Cost": 0.01,
        "Plan Rows": 1, "Plan Width": 4,
        "Actual Startup Time": 0.001, "Actual Total Time": 0.002,
        "Actual Rows": 1, "Actual Loops": 1
    }}]"#;

    let from_text = parse_source(text).expect("text parse failed");
    let from_json = parse_source(json).expect("json parse failed");

    assert_eq!(from_text.content.plan, from_json.content.plan);
}

#[test]
fn test_embedded_json_block() {
    let source = "LOG:  duration: 0.5 ms  plan:\n[\n  {\"Plan\": {\"Node Type\": \"Result\"}}\n]\nsome trailing chatter";

    let plan = parse_source(source).expect("parse failed");

    assert_eq!(plan.content.plan.node_type, "Result");
}

#[test]
fn test_embedded_json_errors_are_fatal() {
    let source = "chatter\n[\n  {\"Plan\": }\n]\n";

    let error = parse_source(source).expect_err("should fail");

    assert!(matches!(error, ExplainError::InvalidJson(_)));
}

// ============================================================================
// Metadata and Error Tests
// ============================================================================

#[test]
fn test_pinned_metadata_makes_parsing_deterministic() {
    let source = " Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)";
    let options = || PlanOptions {
        name: Some("nightly".into()),
        query: Some("SELECT 1".into()),
        id: Some("plan_fixed".into()),
        created_on: Some(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    };

    let first = parse_source_as(source, options()).expect("parse failed");
    let second = parse_source_as(source, options()).expect("parse failed");

    assert_eq!(first, second);
    assert_eq!(first.id, "plan_fixed");
    assert_eq!(first.name, "nightly");
    assert_eq!(first.query, "SELECT 1");
}

#[test]
fn test_query_text_becomes_the_plan_query() {
    let source = " Query Text: SELECT count(*)\n   FROM t\n Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)";

    let plan = parse_source(source).expect("parse failed");

    assert_eq!(plan.query, "SELECT count(*)\nFROM t");
}

#[test]
fn test_unparseable_source_is_a_parse_failure() {
    let error = parse_source("complete garbage without any plan").expect_err("should fail");

    assert!(matches!(error, ExplainError::ParseFailure));
}
