//! Source Normalizer - strips decoration from pasted EXPLAIN output
//!
//! EXPLAIN output reaches us wrapped in whatever the user copied it from:
//! psql table borders, CSV quoting, editor line continuations, localized
//! row-count footers. Cleanup removes the wrapping while preserving the
//! indentation of the plan body, since the text parser infers tree depth
//! from leading spaces.

use std::sync::LazyLock;

use regex::Regex;

/// `+\n` line continuation emitted by psql's wrapped format
static PLUS_CONTINUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\+\n").expect("invalid continuation pattern"));

/// `↵` glyph standing in for a newline in copied output
static ARROW_CONTINUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"↵\r?").expect("invalid continuation pattern"));

/// Localized row-count footer, e.g. `(8 rows)` or `(8 lignes)`
static ROW_COUNT_FOOTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\(\d+\s+\p{L}+\)\s*$").expect("invalid footer pattern"));

/// Characters that frame a psql/unicode table row on both sides
const ROW_FRAMES: [char; 3] = ['|', '│', '║'];

/// Normalizes a pasted EXPLAIN source to its plan body.
///
/// Applies, in order: table-row frame removal, ruler-line removal, per-line
/// quote stripping, line-continuation collapsing, `QUERY PLAN` header
/// removal, and row-count footer removal. Leading spaces on plan lines are
/// preserved.
pub fn cleanup_source(source: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for raw in source.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let line = strip_row_frame(line);
        if is_ruler(line) {
            continue;
        }
        lines.push(strip_quotes(line));
    }
    let text = lines.join("\n");

    let text = PLUS_CONTINUATION.replace_all(&text, "\n");
    let text = ARROW_CONTINUATION.replace_all(&text, "\n");

    let mut out = String::with_capacity(text.len());
    for line in text.split('\n') {
        if line.trim() == "QUERY PLAN" || ROW_COUNT_FOOTER.is_match(line) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    // A single trailing newline, as the join above introduced one per line
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

/// Removes a matching frame character from both ends of a table row
fn strip_row_frame(line: &str) -> &str {
    for frame in ROW_FRAMES {
        if let Some(rest) = line.strip_prefix(frame)
            && let Some(inner) = rest.strip_suffix(frame)
        {
            return inner;
        }
    }
    line
}

/// Removes one pair of surrounding quotes, `"` or `'`
fn strip_quotes(line: &str) -> &str {
    for quote in ['"', '\''] {
        if line.len() >= 2
            && let Some(rest) = line.strip_prefix(quote)
            && let Some(inner) = rest.strip_suffix(quote)
        {
            return inner;
        }
    }
    line
}

/// True for horizontal separator lines: `+---+`, `----`, `═══`, and the
/// box-drawing top/bottom/middle borders (`┌─┐`, `└─┘`, `╔═╗`, `╚═╝`, `├─┤`)
fn is_ruler(line: &str) -> bool {
    let line = line.trim_end();
    let mut chars = line.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if line.chars().count() < 2 {
        return false;
    }
    // ASCII rulers: any mix of `+` and `-` with at least one dash
    if line.chars().all(|c| c == '+' || c == '-') {
        return line.contains('-');
    }
    // Double-line rulers without corners
    if line.chars().all(|c| c == '═' || c == '─') {
        return true;
    }
    // Box-drawing borders with corner or junction characters at both ends
    let last = line.chars().next_back().unwrap_or(first);
    let opens = ['┌', '└', '├', '╔', '╚', '╠'];
    let closes = ['┐', '┘', '┤', '╗', '╝', '╣'];
    opens.contains(&first)
        && closes.contains(&last)
        && chars.take_while(|c| *c != last).all(|c| c == '─' || c == '═')
}

/// Locates a JSON block embedded in surrounding chatter.
///
/// The block starts at the first line whose content is a lone `[` or `{`
/// preceded by some whitespace prefix, and ends at the first following line
/// made of the same prefix and the matching amount of closing context (`]`
/// or `}`). Returns the slice covering both lines.
pub(crate) fn extract_bracketed(source: &str) -> Option<&str> {
    let mut offset = 0;
    let mut start: Option<(usize, &str)> = None;
    for line in source.split_inclusive('\n') {
        let content = line.trim_end_matches(['\r', '\n']);
        match start {
            None => {
                let prefix_len = content.len() - content.trim_start().len();
                let (prefix, rest) = content.split_at(prefix_len);
                if rest == "[" || rest == "{" {
                    start = Some((offset, prefix));
                }
            }
            Some((start_offset, prefix)) => {
                if let Some(rest) = content.strip_prefix(prefix)
                    && (rest == "]" || rest == "}")
                {
                    let end = offset + content.len();
                    return Some(&source[start_offset..end]);
                }
            }
        }
        offset += line.len();
    }
    None
}
