//! Tests for the attribute sub-parsers

use super::*;
use crate::explain::ExplainError;
use pretty_assertions::assert_eq;
use serde_json::json;

fn element() -> Map<String, Value> {
    Map::new()
}

// ============================================================================
// Sort Tests
// ============================================================================

#[test]
fn test_parse_sort_in_memory() {
    let mut el = element();

    assert!(parse_sort("Sort Method: quicksort  Memory: 25kB", &mut el));
    assert_eq!(el["Sort Method"], json!("quicksort"));
    assert_eq!(el["Sort Space Used"], json!(25));
    assert_eq!(el["Sort Space Type"], json!("Memory"));
}

#[test]
fn test_parse_sort_on_disk() {
    let mut el = element();

    assert!(parse_sort("Sort Method: external merge  Disk: 4920kB", &mut el));
    assert_eq!(el["Sort Method"], json!("external merge"));
    assert_eq!(el["Sort Space Used"], json!(4920));
    assert_eq!(el["Sort Space Type"], json!("Disk"));
}

#[test]
fn test_parse_sort_rejects_other_lines() {
    let mut el = element();

    assert!(!parse_sort("Sort Key: a, b", &mut el));
    assert!(el.is_empty());
}

// ============================================================================
// Sort Groups Tests
// ============================================================================

#[test]
fn test_parse_full_sort_groups() {
    let mut el = element();
    let line = "Full-sort Groups: 2  Sort Method: quicksort  Average Memory: 28kB  Peak Memory: 28kB";

    assert!(parse_sort_groups(line, &mut el).expect("parse failed"));
    assert_eq!(
        el["Full-sort Groups"],
        json!({
            "Group Count": 2,
            "Sort Methods Used": ["quicksort"],
            "Sort Space Memory": {
                "Average Sort Space Used": 28,
                "Peak Sort Space Used": 28
            }
        })
    );
}

#[test]
fn test_parse_pre_sorted_groups_with_method_list() {
    let mut el = element();
    let line =
        "Pre-sorted Groups: 1  Sort Methods: top-N heapsort, quicksort  Average Memory: 30kB  Peak Memory: 32kB";

    assert!(parse_sort_groups(line, &mut el).expect("parse failed"));
    assert_eq!(
        el["Pre-sorted Groups"]["Sort Methods Used"],
        json!(["top-N heapsort", "quicksort"])
    );
    assert_eq!(el["Pre-sorted Groups"]["Group Count"], json!(1));
}

#[test]
fn test_unknown_sort_groups_kind_is_fatal() {
    let mut el = element();
    let line = "Half-sort Groups: 2  Sort Method: quicksort  Average Memory: 28kB  Peak Memory: 28kB";

    let error = parse_sort_groups(line, &mut el).expect_err("should fail");

    match error {
        ExplainError::UnsupportedSortGroupsKind(kind) => assert_eq!(kind, "Half-sort"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_sort_groups_ignores_unrelated_lines() {
    let mut el = element();

    assert!(!parse_sort_groups("Group Key: a", &mut el).expect("parse failed"));
}

// ============================================================================
// Sort Key Tests
// ============================================================================

#[test]
fn test_parse_sort_key_splits_on_top_level_commas() {
    let mut el = element();

    assert!(parse_sort_key("Sort Key: a, (b, c), d DESC", &mut el));
    assert_eq!(el["Sort Key"], json!(["a", "(b, c)", "d DESC"]));
}

#[test]
fn test_parse_presorted_key() {
    let mut el = element();

    assert!(parse_sort_key("Presorted Key: x", &mut el));
    assert_eq!(el["Presorted Key"], json!(["x"]));
}

// ============================================================================
// Buffers / WAL / IO Tests
// ============================================================================

#[test]
fn test_parse_buffers_initializes_mentioned_classes() {
    let mut el = element();

    assert!(parse_buffers("Buffers: shared hit=5 read=2, temp written=3", &mut el));
    assert_eq!(el["Shared Hit Blocks"], json!(5));
    assert_eq!(el["Shared Read Blocks"], json!(2));
    assert_eq!(el["Shared Dirtied Blocks"], json!(0));
    assert_eq!(el["Shared Written Blocks"], json!(0));
    assert_eq!(el["Temp Written Blocks"], json!(3));
    assert_eq!(el["Temp Hit Blocks"], json!(0));
    assert_eq!(el["Temp Read Blocks"], json!(0));
    assert_eq!(el["Temp Dirtied Blocks"], json!(0));
    assert!(!el.contains_key("Local Hit Blocks"));
}

#[test]
fn test_parse_wal_zero_initializes_counters() {
    let mut el = element();

    assert!(parse_wal("WAL: records=5 bytes=832", &mut el));
    assert_eq!(el["WAL Records"], json!(5));
    assert_eq!(el["WAL Bytes"], json!(832));
    assert_eq!(el["WAL FPI"], json!(0));
}

#[test]
fn test_parse_io_timings() {
    let mut el = element();

    assert!(parse_io_timings("I/O Timings: read=0.150 write=0.000", &mut el));
    assert_eq!(el["I/O Read Time"], json!(0.15));
    assert_eq!(el["I/O Write Time"], json!(0.0));
}

// ============================================================================
// Options / Timing / Settings Tests
// ============================================================================

#[test]
fn test_parse_options_decodes_json_values() {
    let mut el = element();
    let line = "Options: Inlining false, Optimization false, Expressions true, Deforming true";

    assert!(parse_options(line, &mut el));
    assert_eq!(
        el["Options"],
        json!({
            "Inlining": false,
            "Optimization": false,
            "Expressions": true,
            "Deforming": true
        })
    );
}

#[test]
fn test_parse_timing_strips_units() {
    let mut el = element();
    let line = "Timing: Generation 0.340 ms, Inlining 0.000 ms, Total 4.680 ms";

    assert!(parse_timing(line, &mut el));
    assert_eq!(
        el["Timing"],
        json!({"Generation": 0.34, "Inlining": 0.0, "Total": 4.68})
    );
}

#[test]
fn test_parse_settings_strips_quotes_and_respects_quoted_commas() {
    let mut el = element();
    let line = "Settings: work_mem = '128MB', search_path = '\"$user\", public'";

    assert!(parse_settings(line, &mut el));
    assert_eq!(el["Settings"]["work_mem"], json!("128MB"));
    assert_eq!(el["Settings"]["search_path"], json!("\"$user\", public"));
}

// ============================================================================
// Helper Tests
// ============================================================================

#[test]
fn test_split_balanced() {
    assert_eq!(split_balanced("a, (b, c), d", ','), vec!["a", "(b, c)", "d"]);
    assert_eq!(split_balanced("f(x, y) DESC, z", ','), vec!["f(x, y) DESC", "z"]);
    assert_eq!(split_balanced("'a, b', c", ','), vec!["'a, b'", "c"]);
    assert_eq!(split_balanced("one", ','), vec!["one"]);
}

#[test]
fn test_title_case() {
    assert_eq!(title_case("execution time"), "Execution Time");
    assert_eq!(title_case("Total runtime"), "Total Runtime");
    assert_eq!(title_case("Sort Method"), "Sort Method");
}

#[test]
fn test_number_or_string() {
    assert_eq!(number_or_string("42"), json!(42));
    assert_eq!(number_or_string("0"), json!(0));
    assert_eq!(number_or_string("0.5"), json!(0.5));
    assert_eq!(number_or_string("quicksort"), json!("quicksort"));
}
