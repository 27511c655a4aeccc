//! Attribute sub-parsers for text-format plan lines
//!
//! Each parser is a total function over a candidate line: it returns `true`
//! when the line was recognized and stored on the element, `false` to let
//! the caller fall through to the next parser. Elements are the raw
//! attribute maps the text parser builds; keys use the names PostgreSQL
//! emits in JSON format so both ingestion paths meet in one model.
//!
//! The only fatal case is a sort-groups line whose kind label is unknown.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::ExplainError;

static SORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Sort Method:\s+(.*)\s+(Memory|Disk):\s+(\d+)kB\s*$")
        .expect("invalid sort pattern")
});

static SORT_GROUPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(\S+)\s+Groups:\s+(\d+)\s+Sort Methods?:\s+(.*?)\s+(?:Average|Peak)\s+Memory:\s+(\d+)kB\s+(?:Average|Peak)\s+Memory:\s+(\d+)kB.*$",
    )
    .expect("invalid sort groups pattern")
});

static SORT_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*((?:Sort|Presorted) Key):\s+(.*)$").expect("invalid sort key pattern")
});

static BUFFERS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Buffers:\s+(.*)$").expect("invalid buffers pattern"));

static BUFFER_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(shared|temp|local)\s+(.*)$").expect("invalid buffer class pattern")
});

static WAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*WAL:\s+(.*)$").expect("invalid WAL pattern"));

static IO_TIMINGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*I/O Timings:\s+(.*)$").expect("invalid I/O pattern"));

static OPTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Options:\s+(.*)$").expect("invalid options pattern"));

static TIMING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Timing:\s+(.*)$").expect("invalid timing pattern"));

static SETTINGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Settings:\s+(.*)$").expect("invalid settings pattern"));

/// `key value` chunk inside Options and Timing lists
static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+(.*)$").expect("invalid key value pattern"));

/// `key = value` chunk inside a Settings list
static SETTING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\S+)\s*=\s*(.*)$").expect("invalid setting pattern"));

/// `Sort Method: quicksort  Memory: 25kB`
pub(crate) fn parse_sort(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = SORT_RE.captures(line) else {
        return false;
    };
    el.insert("Sort Method".into(), caps[1].trim().into());
    if let Ok(used) = caps[3].parse::<u64>() {
        el.insert("Sort Space Used".into(), used.into());
    }
    el.insert("Sort Space Type".into(), caps[2].into());
    true
}

/// `Full-sort Groups: 2  Sort Method: quicksort  Average Memory: 28kB  Peak Memory: 28kB`
///
/// A line shaped like a groups report whose kind is neither `Full-sort` nor
/// `Pre-sorted` is fatal: silently storing it under either key would
/// misattribute the measurements.
pub(crate) fn parse_sort_groups(
    line: &str,
    el: &mut Map<String, Value>,
) -> Result<bool, ExplainError> {
    let Some(caps) = SORT_GROUPS_RE.captures(line) else {
        return Ok(false);
    };
    let mut groups = Map::new();
    if let Ok(count) = caps[2].parse::<u64>() {
        groups.insert("Group Count".into(), count.into());
    }
    let methods: Vec<Value> = caps[3]
        .split(',')
        .map(|method| Value::String(method.trim().to_owned()))
        .collect();
    groups.insert("Sort Methods Used".into(), Value::Array(methods));
    let mut memory = Map::new();
    if let Ok(average) = caps[4].parse::<u64>() {
        memory.insert("Average Sort Space Used".into(), average.into());
    }
    if let Ok(peak) = caps[5].parse::<u64>() {
        memory.insert("Peak Sort Space Used".into(), peak.into());
    }
    groups.insert("Sort Space Memory".into(), Value::Object(memory));

    let key = match &caps[1] {
        "Full-sort" => "Full-sort Groups",
        "Pre-sorted" => "Pre-sorted Groups",
        other => return Err(ExplainError::UnsupportedSortGroupsKind(other.to_owned())),
    };
    el.insert(key.into(), Value::Object(groups));
    Ok(true)
}

/// `Sort Key: a, (b + c), d DESC` - split on top-level commas only
pub(crate) fn parse_sort_key(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = SORT_KEY_RE.captures(line) else {
        return false;
    };
    let keys: Vec<Value> = split_balanced(&caps[2], ',')
        .into_iter()
        .map(Value::String)
        .collect();
    el.insert(caps[1].to_owned(), Value::Array(keys));
    true
}

/// `Buffers: shared hit=5 read=2, temp written=3`
///
/// Every counter of a mentioned buffer class is initialized to zero, then
/// the counters present on the line overwrite their zeros.
pub(crate) fn parse_buffers(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = BUFFERS_RE.captures(line) else {
        return false;
    };
    for chunk in caps[1].split(',') {
        let Some(class) = BUFFER_CLASS_RE.captures(chunk.trim()) else {
            continue;
        };
        for method in ["hit", "read", "written", "dirtied"] {
            el.insert(buffer_key(&class[1], method), 0.into());
        }
        for counter in class[2].split_whitespace() {
            if let Some((method, value)) = counter.split_once('=')
                && let Ok(value) = value.parse::<u64>()
            {
                el.insert(buffer_key(&class[1], method), value.into());
            }
        }
    }
    true
}

/// `WAL: records=5 bytes=832 fpi=0`
pub(crate) fn parse_wal(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = WAL_RE.captures(line) else {
        return false;
    };
    for counter in ["Records", "Bytes", "FPI"] {
        el.insert(format!("WAL {counter}"), 0.into());
    }
    for token in caps[1].split_whitespace() {
        if let Some((key, value)) = token.split_once('=')
            && let Ok(value) = value.parse::<u64>()
        {
            let counter = if key == "fpi" {
                "FPI".to_owned()
            } else {
                capitalize(key)
            };
            el.insert(format!("WAL {counter}"), value.into());
        }
    }
    true
}

/// `I/O Timings: read=0.15 write=0.00`
pub(crate) fn parse_io_timings(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = IO_TIMINGS_RE.captures(line) else {
        return false;
    };
    el.insert("I/O Read Time".into(), 0.into());
    el.insert("I/O Write Time".into(), 0.into());
    for token in caps[1].split_whitespace() {
        if let Some((key, value)) = token.split_once('=')
            && let Ok(value) = value.parse::<f64>()
        {
            el.insert(format!("I/O {} Time", capitalize(key)), float_value(value));
        }
    }
    true
}

/// `Options: Inlining false, Optimization false, Expressions true, Deforming true`
pub(crate) fn parse_options(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = OPTIONS_RE.captures(line) else {
        return false;
    };
    let mut options = Map::new();
    for chunk in caps[1].split(',') {
        if let Some(kv) = KEY_VALUE_RE.captures(chunk.trim()) {
            // Option values are JSON literals: booleans, numbers, strings
            let value = serde_json::from_str(&kv[2])
                .unwrap_or_else(|_| Value::String(kv[2].to_owned()));
            options.insert(kv[1].to_owned(), value);
        }
    }
    el.insert("Options".into(), Value::Object(options));
    true
}

/// `Timing: Generation 0.340 ms, Inlining 0.000 ms, Total 4.680 ms`
pub(crate) fn parse_timing(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = TIMING_RE.captures(line) else {
        return false;
    };
    let mut timing = Map::new();
    for chunk in caps[1].split(',') {
        if let Some(kv) = KEY_VALUE_RE.captures(chunk.trim())
            && let Ok(ms) = kv[2].trim_end_matches("ms").trim_end().parse::<f64>()
        {
            timing.insert(kv[1].to_owned(), float_value(ms));
        }
    }
    el.insert("Timing".into(), Value::Object(timing));
    true
}

/// `Settings: work_mem = '128MB', jit = 'off'`
pub(crate) fn parse_settings(line: &str, el: &mut Map<String, Value>) -> bool {
    let Some(caps) = SETTINGS_RE.captures(line) else {
        return false;
    };
    let mut settings = Map::new();
    for chunk in split_balanced(&caps[1], ',') {
        if let Some(kv) = SETTING_RE.captures(&chunk) {
            settings.insert(kv[1].to_owned(), kv[2].replace('\'', "").into());
        }
    }
    el.insert("Settings".into(), Value::Object(settings));
    true
}

fn buffer_key(class: &str, method: &str) -> String {
    format!("{} {} Blocks", capitalize(class), capitalize(method))
}

/// First letter uppercased, the rest lowercased (`shared` -> `Shared`)
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// First letter of every word uppercased, the rest kept
/// (`execution time` -> `Execution Time`)
pub(crate) fn title_case(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits on a separator occurring at parenthesis nesting depth zero,
/// tracking `()`, `[]`, quoting and backslash escapes. Chunks come back
/// trimmed.
pub(crate) fn split_balanced(input: &str, separator: char) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut depth: u32 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                current.push(c);
            }
            '\'' | '"' => {
                match quote {
                    Some(open) if open == c => quote = None,
                    None => quote = Some(c),
                    Some(_) => {}
                }
                current.push(c);
            }
            '(' | '[' if quote.is_none() => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' if quote.is_none() => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == separator && depth == 0 && quote.is_none() => {
                chunks.push(current.trim().to_owned());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    chunks.push(current.trim().to_owned());
    chunks
}

/// Wraps a float as a JSON number
pub(crate) fn float_value(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Numbers stay numbers, everything else stays a string
pub(crate) fn number_or_string(value: &str) -> Value {
    if let Ok(int) = value.parse::<u64>() {
        return int.into();
    }
    if let Ok(float) = value.parse::<f64>()
        && float.is_finite()
    {
        return float_value(float);
    }
    Value::String(value.to_owned())
}

#[cfg(test)]
mod tests;
