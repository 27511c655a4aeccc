//! Text-format EXPLAIN parser
//!
//! Reconstructs the plan tree from the indented text form. Parsing happens
//! in two steps: `reassemble_lines` undoes the hard wrapping pasted output
//! tends to carry, then a depth-driven stack parser consumes one logical
//! line at a time and emits the same raw attribute tree the JSON path
//! produces, so both formats share the typing and enrichment code.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

use super::attrs;
use super::{ExplainError, Result};

/// One plan node header. The depth prefix is stripped before matching, so
/// the line starts with an optional arrow. Group map:
///
/// - `type` - node type, runs up to the first `(` or `:`
/// - `startup_cost`, `total_cost`, `plan_rows`, `plan_width` - the
///   `(cost=.. rows=.. width=..)` estimate block
/// - `actual_startup`, `actual_total`, `actual_rows`, `actual_loops` - the
///   `(actual time=.. rows=.. loops=..)` block
/// - `rows_only`, `loops_only` - the timing-less `(actual rows=.. loops=..)`
///   variant (EXPLAIN ANALYZE with TIMING off)
/// - `never_executed` - the `(never executed)` marker
///
/// Both parenthesized blocks are optional in the pattern; a line counts as
/// a node only when at least one matched, which keeps `CTE foo` and
/// `SubPlan 1` headers from matching as nodes.
static NODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^(?:->\s*)?
        (?P<type>[^:(]*?)
        \s*
        (?:\(cost=(?P<startup_cost>\d+\.\d+)\.\.(?P<total_cost>\d+\.\d+)
           \s+rows=(?P<plan_rows>\d+)\s+width=(?P<plan_width>\d+)\))?
        \s*
        (?:\((?:
            actual\s+time=(?P<actual_startup>\d+\.\d+)\.\.(?P<actual_total>\d+\.\d+)
                \s+rows=(?P<actual_rows>\d+)\s+loops=(?P<actual_loops>\d+)
            |actual\s+rows=(?P<rows_only>\d+)\s+loops=(?P<loops_only>\d+)
            |(?P<never_executed>never\s+executed)
        )\))?
        \s*$",
    )
    .expect("invalid node pattern")
});

/// `SubPlan 1` / `InitPlan 2 (returns $0)` - the whole line becomes the
/// subplan name carried by the child nodes
static SUBPLAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:Sub|Init)Plan)\s*(?:\d+\s*)?(?:\(returns.*\)\s*)?$")
        .expect("invalid subplan pattern")
});

static CTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CTE\s+(?P<name>\S+)\s*$").expect("invalid cte pattern"));

/// `Worker 0: actual time=.. rows=.. loops=..  <extra>`
static WORKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^Worker\s+(?P<num>\d+):\s*
        (?:
            actual\s+time=(?P<actual_startup>\d+\.\d+)\.\.(?P<actual_total>\d+\.\d+)
                \s+rows=(?P<actual_rows>\d+)\s+loops=(?P<actual_loops>\d+)
            |actual\s+rows=(?P<rows_only>\d+)\s+loops=(?P<loops_only>\d+)
            |never\s+executed
        )?
        \s*(?P<extra>.*)$",
    )
    .expect("invalid worker pattern")
});

static TRIGGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Trigger\s+(?P<name>.*):\s+time=(?P<time>\d+\.\d+)\s+calls=(?P<calls>\d+)\s*$")
        .expect("invalid trigger pattern")
});

static JIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^JIT:\s*$").expect("invalid jit pattern"));

/// Generic `Label: value` attribute line. The label stops at the first
/// colon so values with `::` type casts stay intact.
static EXTRA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<label>[^:]+):\s*(?P<value>.*?)\s*$").expect("invalid extra pattern")
});

/// `Label: value` tail on a worker line
static WORKER_PROP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S.*):\s+(.*)$").expect("invalid worker prop pattern"));

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(QUERY|---|#)").expect("invalid header pattern"));

/// Lines that always open a new logical line during reassembly
static LOGICAL_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:Total\s+runtime|Planning\s+time|Execution\s+time|Time|Filter|Output|JIT)")
        .expect("invalid logical start pattern")
});

/// Parses cleaned text-format EXPLAIN output into the raw attribute tree.
pub(crate) fn parse_text(source: &str) -> Result<Value> {
    let mut parser = TextParser::default();
    for line in reassemble_lines(source) {
        parser.parse_line(&line)?;
    }
    parser.finish()
}

/// Undoes hard wrapping: joins wrapped parenthesized tails and re-attaches
/// continuation fragments to the logical line they belong to.
pub(crate) fn reassemble_lines(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let opens = line.matches('(').count();
        let closes = line.matches(')').count();
        if opens < closes
            && let Some(last) = out.last_mut()
        {
            // Tail of a wrapped parenthesized block
            last.push_str(line);
        } else if LOGICAL_START_RE.is_match(line) {
            out.push(line.to_owned());
        } else if line.chars().next().is_some_and(|c| !c.is_whitespace())
            || line.trim_start().starts_with('(')
        {
            // Wrapped continuations lose their indentation when pasted
            match out.last_mut() {
                Some(last) => last.push_str(line),
                None => out.push(line.to_owned()),
            }
        } else {
            out.push(line.to_owned());
        }
    }
    out
}

/// What an open stack frame points at
#[derive(Clone, Copy)]
enum FrameTarget {
    /// A plan node, by arena index
    Node(usize),
    /// The top-level JIT block on the root envelope
    RootJit,
    /// The JIT block of the last worker of the node at this arena index
    WorkerJit(usize),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    SubNode,
    InitPlan,
    SubPlan,
}

struct Frame {
    depth: usize,
    target: FrameTarget,
    kind: FrameKind,
    /// Subplan name inherited by child nodes (`SubPlan 1`, `CTE x`, ...)
    name: Option<String>,
}

/// Depth-stack parser over logical lines.
///
/// Nodes live in an arena with the parent/child edges kept aside, because
/// Sub/InitPlan and CTE frames alias the node of the frame below them; the
/// tree is assembled once parsing is done.
#[derive(Default)]
struct TextParser {
    nodes: Vec<Map<String, Value>>,
    children: Vec<Vec<usize>>,
    stack: Vec<Frame>,
    root: Map<String, Value>,
    root_plan: Option<usize>,
}

impl TextParser {
    fn parse_line(&mut self, raw: &str) -> Result<()> {
        let line = strip_line_quotes(raw).replace('\t', "    ");
        let depth = line.len() - line.trim_start_matches(' ').len();
        let content = &line[depth..];

        if content.trim().is_empty() || HEADER_RE.is_match(content) {
            return Ok(());
        }
        if let Some(caps) = NODE_RE.captures(content)
            && has_measurements(&caps)
        {
            self.handle_node(depth, &caps);
        } else if SUBPLAN_RE.is_match(content) {
            self.handle_subplan(depth, content);
        } else if let Some(caps) = CTE_RE.captures(content) {
            self.handle_cte(depth, &caps);
        } else if let Some(caps) = WORKER_RE.captures(content) {
            self.handle_worker(&caps);
        } else if let Some(caps) = TRIGGER_RE.captures(content) {
            self.handle_trigger(&caps);
        } else if JIT_RE.is_match(content) {
            self.handle_jit(depth);
        } else if let Some(caps) = EXTRA_RE.captures(content) {
            self.handle_extra(depth, content, &caps)?;
        } else {
            // Inside the query text of auto_explain output, or noise
            self.append_query_text(content);
        }
        Ok(())
    }

    fn handle_node(&mut self, depth: usize, caps: &Captures) {
        let mut node = Map::new();
        node.insert("Node Type".into(), caps["type"].trim().into());
        if let (Some(startup), Some(total)) = (f64_group(caps, "startup_cost"), f64_group(caps, "total_cost")) {
            node.insert("Startup Cost".into(), attrs::float_value(startup));
            node.insert("Total Cost".into(), attrs::float_value(total));
        }
        if let Some(rows) = u64_group(caps, "plan_rows") {
            node.insert("Plan Rows".into(), rows.into());
        }
        if let Some(width) = u64_group(caps, "plan_width") {
            node.insert("Plan Width".into(), width.into());
        }
        if caps.name("never_executed").is_some() {
            node.insert("Actual Loops".into(), 0.into());
            node.insert("Actual Rows".into(), 0.into());
            node.insert("Actual Total Time".into(), 0.into());
        } else if let (Some(startup), Some(total)) =
            (f64_group(caps, "actual_startup"), f64_group(caps, "actual_total"))
        {
            node.insert("Actual Startup Time".into(), attrs::float_value(startup));
            node.insert("Actual Total Time".into(), attrs::float_value(total));
            if let Some(rows) = u64_group(caps, "actual_rows") {
                node.insert("Actual Rows".into(), rows.into());
            }
            if let Some(loops) = u64_group(caps, "actual_loops") {
                node.insert("Actual Loops".into(), loops.into());
            }
        } else {
            if let Some(rows) = u64_group(caps, "rows_only") {
                node.insert("Actual Rows".into(), rows.into());
            }
            if let Some(loops) = u64_group(caps, "loops_only") {
                node.insert("Actual Loops".into(), loops.into());
            }
        }

        self.nodes.push(node);
        self.children.push(Vec::new());
        let idx = self.nodes.len() - 1;

        self.pop_to(depth);
        match self.stack.last() {
            None => self.root_plan = Some(idx),
            Some(parent) => {
                if let FrameTarget::Node(parent_idx) = parent.target {
                    let relationship = match parent.kind {
                        FrameKind::InitPlan => Some("InitPlan"),
                        FrameKind::SubPlan => Some("SubPlan"),
                        FrameKind::SubNode => None,
                    };
                    if let Some(relationship) = relationship {
                        let name = parent.name.clone();
                        let child = &mut self.nodes[idx];
                        child.insert("Parent Relationship".into(), relationship.into());
                        if let Some(name) = name {
                            child.insert("Subplan Name".into(), name.into());
                        }
                    }
                    self.children[parent_idx].push(idx);
                }
            }
        }
        self.stack.push(Frame {
            depth,
            target: FrameTarget::Node(idx),
            kind: FrameKind::SubNode,
            name: None,
        });
    }

    fn handle_subplan(&mut self, depth: usize, content: &str) {
        self.pop_to(depth);
        // The frame reuses the enclosing node: child nodes attach to it but
        // carry the subplan relationship and name.
        let Some(target) = self.stack.last().map(|parent| parent.target) else {
            return;
        };
        let kind = if content.starts_with("Init") {
            FrameKind::InitPlan
        } else {
            FrameKind::SubPlan
        };
        self.stack.push(Frame {
            depth,
            target,
            kind,
            name: Some(content.trim().to_owned()),
        });
    }

    fn handle_cte(&mut self, depth: usize, caps: &Captures) {
        self.pop_to(depth);
        let Some(target) = self.stack.last().map(|parent| parent.target) else {
            return;
        };
        self.stack.push(Frame {
            depth,
            target,
            kind: FrameKind::InitPlan,
            name: Some(format!("CTE {}", &caps["name"])),
        });
    }

    fn handle_worker(&mut self, caps: &Captures) {
        let Some(node_idx) = self.nearest_node() else {
            return;
        };
        let Ok(number) = caps["num"].parse::<u64>() else {
            return;
        };
        let node = &mut self.nodes[node_idx];
        let workers = node
            .entry("Workers")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(list) = workers.as_array_mut() else {
            return;
        };
        if !list
            .iter()
            .any(|w| w.get("Worker Number").and_then(Value::as_u64) == Some(number))
        {
            let mut fresh = Map::new();
            fresh.insert("Worker Number".into(), number.into());
            list.push(Value::Object(fresh));
        }
        let Some(worker) = list
            .iter_mut()
            .find(|w| w.get("Worker Number").and_then(Value::as_u64) == Some(number))
            .and_then(Value::as_object_mut)
        else {
            return;
        };

        if let (Some(startup), Some(total)) =
            (f64_group(caps, "actual_startup"), f64_group(caps, "actual_total"))
        {
            worker.insert("Actual Startup Time".into(), attrs::float_value(startup));
            worker.insert("Actual Total Time".into(), attrs::float_value(total));
            if let Some(rows) = u64_group(caps, "actual_rows") {
                worker.insert("Actual Rows".into(), rows.into());
            }
            if let Some(loops) = u64_group(caps, "actual_loops") {
                worker.insert("Actual Loops".into(), loops.into());
            }
        } else {
            if let Some(rows) = u64_group(caps, "rows_only") {
                worker.insert("Actual Rows".into(), rows.into());
            }
            if let Some(loops) = u64_group(caps, "loops_only") {
                worker.insert("Actual Loops".into(), loops.into());
            }
        }

        let extra = caps["extra"].trim().to_owned();
        if extra.is_empty() || attrs::parse_sort(&extra, worker) {
            return;
        }
        if let Some(prop) = WORKER_PROP_RE.captures(&extra) {
            worker.insert(attrs::title_case(&prop[1]), prop[2].into());
        }
    }

    fn handle_trigger(&mut self, caps: &Captures) {
        let triggers = self
            .root
            .entry("Triggers")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(list) = triggers.as_array_mut() else {
            return;
        };
        let mut trigger = Map::new();
        trigger.insert("Trigger Name".into(), caps["name"].into());
        if let Some(time) = f64_group(caps, "time") {
            trigger.insert("Time".into(), attrs::float_value(time));
        }
        if let Some(calls) = u64_group(caps, "calls") {
            trigger.insert("Calls".into(), calls.into());
        }
        list.push(Value::Object(trigger));
    }

    fn handle_jit(&mut self, depth: usize) {
        if self.stack.is_empty() {
            self.root.insert("JIT".into(), Value::Object(Map::new()));
            self.stack.push(Frame {
                depth: 1,
                target: FrameTarget::RootJit,
                kind: FrameKind::SubNode,
                name: None,
            });
            return;
        }
        // Under a node the block describes the last reported worker; with
        // no workers in sight there is nothing to attach it to.
        let Some(node_idx) = self.nearest_node() else {
            return;
        };
        let last_worker = self.nodes[node_idx]
            .get_mut("Workers")
            .and_then(Value::as_array_mut)
            .and_then(|list| list.last_mut())
            .and_then(Value::as_object_mut);
        if let Some(worker) = last_worker {
            worker.insert("JIT".into(), Value::Object(Map::new()));
            self.stack.push(Frame {
                depth,
                target: FrameTarget::WorkerJit(node_idx),
                kind: FrameKind::SubNode,
                name: None,
            });
        }
    }

    fn handle_extra(&mut self, depth: usize, line: &str, caps: &Captures) -> Result<()> {
        self.pop_to(depth);
        if self.root_plan.is_none() && self.root.contains_key("Query Text") {
            self.append_query_text(line);
            return Ok(());
        }
        let Some(el) = self.current_element() else {
            return Ok(());
        };
        if attrs::parse_sort(line, el)
            || attrs::parse_buffers(line, el)
            || attrs::parse_wal(line, el)
            || attrs::parse_io_timings(line, el)
            || attrs::parse_options(line, el)
            || attrs::parse_timing(line, el)
            || attrs::parse_settings(line, el)
        {
            return Ok(());
        }
        if attrs::parse_sort_groups(line, el)? || attrs::parse_sort_key(line, el) {
            return Ok(());
        }

        let label = &caps["label"];
        let value = &caps["value"];
        // Strip a trailing time unit so durations become numbers
        let stored = match value.strip_suffix("ms").map(str::trim_end) {
            Some(number) if number.parse::<f64>().is_ok() => attrs::number_or_string(number),
            _ => attrs::number_or_string(value),
        };
        let lowered = label.to_lowercase();
        let label = if lowered.contains("time") || lowered.contains("runtime") {
            attrs::title_case(label)
        } else {
            label.to_owned()
        };
        let Some(el) = self.current_element() else {
            return Ok(());
        };
        el.insert(label, stored);
        Ok(())
    }

    /// Continuation of a multi-line `Query Text` attribute
    fn append_query_text(&mut self, content: &str) {
        if self.root_plan.is_some() {
            debug!(line = content, "ignoring unrecognized plan line");
            return;
        }
        if let Some(Value::String(text)) = self.root.get_mut("Query Text") {
            text.push('\n');
            text.push_str(content);
        } else {
            debug!(line = content, "ignoring unrecognized plan line");
        }
    }

    /// Drops frames opened at this depth or deeper
    fn pop_to(&mut self, depth: usize) {
        self.stack.retain(|frame| frame.depth < depth);
    }

    /// The nearest enclosing plan-node frame
    fn nearest_node(&self) -> Option<usize> {
        self.stack.iter().rev().find_map(|frame| match frame.target {
            FrameTarget::Node(idx) => Some(idx),
            _ => None,
        })
    }

    /// The attribute map the current frame points at; the root envelope
    /// when the stack is empty
    fn current_element(&mut self) -> Option<&mut Map<String, Value>> {
        let Some(frame) = self.stack.last() else {
            return Some(&mut self.root);
        };
        match frame.target {
            FrameTarget::Node(idx) => self.nodes.get_mut(idx),
            FrameTarget::RootJit => self.root.get_mut("JIT").and_then(Value::as_object_mut),
            FrameTarget::WorkerJit(idx) => self
                .nodes
                .get_mut(idx)
                .and_then(|node| node.get_mut("Workers"))
                .and_then(Value::as_array_mut)
                .and_then(|list| list.last_mut())
                .and_then(|worker| worker.get_mut("JIT"))
                .and_then(Value::as_object_mut),
        }
    }

    fn finish(mut self) -> Result<Value> {
        let Some(root_idx) = self.root_plan else {
            return Err(ExplainError::ParseFailure);
        };
        let plan = assemble(&mut self.nodes, &self.children, root_idx);
        self.root.insert("Plan".into(), plan);
        Ok(Value::Object(self.root))
    }
}

/// Moves an arena node and its subtree into a nested `Plans` value
fn assemble(nodes: &mut [Map<String, Value>], children: &[Vec<usize>], idx: usize) -> Value {
    let mut map = std::mem::take(&mut nodes[idx]);
    let kids: Vec<Value> = children[idx]
        .iter()
        .map(|&child| assemble(nodes, children, child))
        .collect();
    if !kids.is_empty() {
        map.insert("Plans".into(), Value::Array(kids));
    }
    Value::Object(map)
}

/// True when the line carried an estimate block, an actuals block, or a
/// `never executed` marker - a bare label is not a node
fn has_measurements(caps: &Captures) -> bool {
    caps.name("total_cost").is_some()
        || caps.name("actual_total").is_some()
        || caps.name("rows_only").is_some()
        || caps.name("never_executed").is_some()
}

/// Removes one level of CSV-style quoting from a pasted line. The leading
/// quote absorbs the whitespace before it; indentation after the quote is
/// what carries depth.
fn strip_line_quotes(line: &str) -> &str {
    let trimmed = line.trim_end();
    let line = trimmed.strip_suffix('"').unwrap_or(trimmed);
    let unindented = line.trim_start();
    match unindented.strip_prefix('"') {
        Some(rest) => rest,
        None => line,
    }
}

fn f64_group(caps: &Captures, name: &str) -> Option<f64> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn u64_group(caps: &Captures, name: &str) -> Option<u64> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}
