//! Tool-call extraction from model output.
//!
//! [`parse_tool_calls`] is a pure, total function from free-form assistant
//! text to an ordered sequence of [`ToolCall`]s.  It recognises two
//! syntaxes in a single pass:
//!
//! 1. **JSON blocks** delimited by `<tool_call>…</tool_call>` containing an
//!    object with `name` and `arguments` fields (the latter possibly a
//!    stringified JSON object).  Named arguments are mapped onto the
//!    positional vector through an alias table (`path|file|filename`,
//!    `command|cmd`, `content`, `pattern|glob`, `query|search`,
//!    `description|message|error`).
//! 2. **Inline invocations** of the form `@tool(args)`: triple-quoted
//!    two-argument writes, two-argument searches, and single-argument calls
//!    in double-quoted, single-quoted, or unquoted form.
//!
//! Unknown tool names inside JSON blocks are ignored; a malformed JSON
//! block falls through to the inline scan.  Wrapper tokens some models
//! emit around tool calls (`<|tool_call|>`, `[TOOL_CALLS]`, …) are stripped
//! before the inline scan.  The parser never panics and never returns a
//! partial call.
//!
//! # Example
//!
//! ```rust
//! use swarmllm::tool_parser::parse_tool_calls;
//! use swarmllm::tools::ToolName;
//!
//! let calls = parse_tool_calls("Let me check. @read_file(\"src/lib.rs\")");
//! assert_eq!(calls.len(), 1);
//! assert_eq!(calls[0].name, ToolName::ReadFile);
//! assert_eq!(calls[0].args, vec!["src/lib.rs"]);
//! ```

use crate::swarmllm::tools::{ToolCall, ToolName};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// Wrapper tokens stripped (blanked in place) before the inline scan.
const WRAPPER_TOKENS: &[&str] = &[
    "<tool_call>",
    "</tool_call>",
    "<|tool_call|>",
    "<tool_use>",
    "[TOOL_CALL]",
    "[TOOL_CALLS]",
];

lazy_static! {
    static ref MULTILINE_RE: Regex = Regex::new(
        r#"(?s)@(write_file|append_file)\(\s*([^,]+?)\s*,\s*"""(.*?)"""\s*\)"#
    )
    .expect("multiline tool regex compiles");
    static ref SEARCH_RE: Regex =
        Regex::new(r"@search_files\(\s*([^,)]+?)\s*,\s*([^)]+?)\s*\)")
            .expect("search tool regex compiles");
    static ref DOUBLE_QUOTED_RE: Regex = Regex::new(
        r#"@(read_file|list_dir|run_command|report_error)\(\s*"((?:[^"\\]|\\.)*)"\s*\)"#
    )
    .expect("double-quoted tool regex compiles");
    static ref SINGLE_QUOTED_RE: Regex = Regex::new(
        r"@(read_file|list_dir|run_command|report_error)\(\s*'((?:[^'\\]|\\.)*)'\s*\)"
    )
    .expect("single-quoted tool regex compiles");
    static ref UNQUOTED_RE: Regex =
        Regex::new(r"@(read_file|list_dir|run_command|report_error)\(([^)]*)\)")
            .expect("unquoted tool regex compiles");
}

/// Extract all tool calls from `text`, in textual order.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut found: Vec<(usize, ToolCall)> = Vec::new();
    let mut working = text.to_string();

    // Phase 1: well-formed JSON blocks.  Each parsed block is blanked out of
    // the working copy so the inline scan cannot re-match its content;
    // malformed blocks are left in place and fall through.
    extract_json_blocks(&mut working, &mut found);

    // Phase 2: inline invocations over the remaining text.
    for token in WRAPPER_TOKENS {
        blank_token(&mut working, token);
    }
    extract_inline(&working, &mut found);

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, call)| call).collect()
}

/// Map a named-argument JSON object onto the positional vector for `name`.
fn positional_args(name: ToolName, params: &Value) -> Option<Vec<String>> {
    let get = |keys: &[&str]| -> Option<String> {
        for key in keys {
            if let Some(v) = params.get(*key) {
                return Some(match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        }
        None
    };

    match name {
        ToolName::ReadFile | ToolName::ListDir => {
            Some(vec![get(&["path", "file", "filename"])?])
        }
        ToolName::WriteFile | ToolName::AppendFile => Some(vec![
            get(&["path", "file", "filename"])?,
            get(&["content"])?,
        ]),
        ToolName::SearchFiles => Some(vec![
            get(&["pattern", "glob"])?,
            get(&["query", "search"])?,
        ]),
        ToolName::RunCommand => Some(vec![get(&["command", "cmd"])?]),
        ToolName::ReportError => Some(vec![get(&["description", "message", "error"])?]),
    }
}

fn extract_json_blocks(working: &mut String, found: &mut Vec<(usize, ToolCall)>) {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";

    let mut search_from = 0;
    loop {
        let start = match working[search_from..].find(OPEN) {
            Some(pos) => search_from + pos,
            None => break,
        };
        let body_start = start + OPEN.len();
        let end = match working[body_start..].find(CLOSE) {
            Some(pos) => body_start + pos,
            None => break,
        };
        let block_end = end + CLOSE.len();
        let body = working[body_start..end].trim().to_string();

        match serde_json::from_str::<Value>(&body) {
            Ok(parsed) => {
                if let Some(call) = call_from_json(&parsed) {
                    found.push((start, call));
                }
                // Parsed (even if the name was unknown) — blank the block.
                blank_range(working, start, block_end);
            }
            Err(_) => {
                // Malformed JSON: leave the body for the inline scan.
            }
        }
        search_from = block_end;
    }
}

fn call_from_json(parsed: &Value) -> Option<ToolCall> {
    let name = ToolName::parse(parsed.get("name")?.as_str()?)?;
    let raw_args = parsed.get("arguments")?;
    // `arguments` may itself be a stringified JSON object.
    let args_value;
    let params = match raw_args {
        Value::String(s) => {
            args_value = serde_json::from_str::<Value>(s).ok()?;
            &args_value
        }
        other => other,
    };
    Some(ToolCall::new(name, positional_args(name, params)?))
}

/// Candidate inline match with its span, specificity, and quoting.
struct Candidate {
    start: usize,
    end: usize,
    priority: u8,
    quoted: bool,
    call: ToolCall,
}

fn extract_inline(text: &str, found: &mut Vec<(usize, ToolCall)>) {
    let mut candidates: Vec<Candidate> = Vec::new();

    for caps in MULTILINE_RE.captures_iter(text) {
        let m = caps.get(0).expect("whole match");
        if let Some(name) = ToolName::parse(&caps[1]) {
            candidates.push(Candidate {
                start: m.start(),
                end: m.end(),
                priority: 0,
                quoted: true,
                call: ToolCall::new(name, vec![trim_arg(&caps[2]), caps[3].to_string()]),
            });
        }
    }

    for caps in SEARCH_RE.captures_iter(text) {
        let m = caps.get(0).expect("whole match");
        candidates.push(Candidate {
            start: m.start(),
            end: m.end(),
            priority: 1,
            quoted: true,
            call: ToolCall::new(
                ToolName::SearchFiles,
                vec![caps[1].trim().to_string(), caps[2].trim().to_string()],
            ),
        });
    }

    for (re, priority) in [(&*DOUBLE_QUOTED_RE, 2u8), (&*SINGLE_QUOTED_RE, 3u8)] {
        for caps in re.captures_iter(text) {
            let m = caps.get(0).expect("whole match");
            if let Some(name) = ToolName::parse(&caps[1]) {
                candidates.push(Candidate {
                    start: m.start(),
                    end: m.end(),
                    priority,
                    quoted: true,
                    call: ToolCall::new(name, vec![unescape(&caps[2])]),
                });
            }
        }
    }

    for caps in UNQUOTED_RE.captures_iter(text) {
        let m = caps.get(0).expect("whole match");
        if let Some(name) = ToolName::parse(&caps[1]) {
            let arg = caps[2].trim().to_string();
            if arg.is_empty() {
                continue;
            }
            candidates.push(Candidate {
                start: m.start(),
                end: m.end(),
                priority: 4,
                quoted: false,
                call: ToolCall::new(name, vec![arg]),
            });
        }
    }

    // Earliest-start wins; at equal start, the more specific form wins, so a
    // quoted invocation shadows the looser unquoted match over the same span.
    candidates.sort_by_key(|c| (c.start, c.priority));

    let mut last_end = 0;
    let mut quoted_seen: Vec<(ToolName, String)> = Vec::new();
    for candidate in candidates {
        if candidate.start < last_end {
            continue;
        }
        let key = (
            candidate.call.name,
            candidate.call.args.first().cloned().unwrap_or_default(),
        );
        if !candidate.quoted && quoted_seen.contains(&key) {
            // A later unquoted duplicate of an earlier quoted match.
            last_end = candidate.end;
            continue;
        }
        if candidate.quoted {
            quoted_seen.push(key);
        }
        last_end = candidate.end;
        found.push((candidate.start, candidate.call));
    }
}

fn trim_arg(raw: &str) -> String {
    let mut arg = raw.trim();
    for quote in ['"', '\''] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            arg = &arg[1..arg.len() - 1];
        }
    }
    arg.to_string()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn blank_token(working: &mut String, token: &str) {
    let blank = " ".repeat(token.len());
    while let Some(pos) = working.find(token) {
        working.replace_range(pos..pos + token.len(), &blank);
    }
}

// Byte-length preserving so match offsets stay stable across phases.
fn blank_range(working: &mut String, start: usize, end: usize) {
    let mut blank = String::with_capacity(end - start);
    for c in working[start..end].chars() {
        if c == '\n' {
            blank.push('\n');
        } else {
            for _ in 0..c.len_utf8() {
                blank.push(' ');
            }
        }
    }
    working.replace_range(start..end, &blank);
}
