//! Delegation extraction from streaming leader output.
//!
//! Leaders hand work to specialists by writing `@delegate(Agent, "task")`
//! in their replies.  [`parse_delegations`] extracts those commands from
//! free-form model text.  The parser is total — it never fails and never
//! returns partial garbage — and it ignores anything inside fenced code
//! blocks or inline backtick spans, so a leader can *show* the syntax in a
//! tutorial without triggering a dispatch.
//!
//! # Incremental use
//!
//! In the streaming path the engine re-invokes the parser on a
//! monotonically growing prefix of the assistant output after each text
//! chunk and only acts on delegations at indices it has not yet dispatched.
//! Two properties make that safe:
//!
//! - a delegation is only reported once its closing `)` has arrived, and
//! - an *unclosed* code fence masks everything after it, so commands inside
//!   a code block that is still streaming never surface early.
//!
//! # Example
//!
//! ```rust
//! use swarmllm::delegation::parse_delegations;
//!
//! let text = r#"I'll split this up.
//! @delegate(Developer, "implement the parser")
//! @delegate(QA, "write regression tests")"#;
//!
//! let delegations = parse_delegations(text);
//! assert_eq!(delegations.len(), 2);
//! assert_eq!(delegations[0].agent, "Developer");
//! assert_eq!(delegations[1].task, "write regression tests");
//! ```

use serde::{Deserialize, Serialize};

/// A parsed delegation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegation {
    /// Target agent display name, matched case-insensitively against the
    /// registry.
    pub agent: String,
    /// The task text, with backslash escapes resolved.
    pub task: String,
}

/// Outcome of one dispatched delegation, as fed back to the leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult {
    /// Target agent id (empty when the target did not resolve).
    pub agent_id: String,
    /// Target agent display name as written by the leader.
    pub agent_name: String,
    /// The task text.
    pub task: String,
    /// The specialist's final response, on success.
    pub response: Option<String>,
    /// The failure text, on error (including unresolvable targets).
    pub error: Option<String>,
}

const MARKER: &str = "@delegate(";

/// Extract all complete `@delegate(Agent, "task")` commands from `text`, in
/// order of appearance.
///
/// The agent name is everything up to the first comma, trimmed.  The task
/// is a quoted string using either quote style, supporting backslash
/// escapes and embedded quotes.  A match is only accepted when the closing
/// quote is followed by optional whitespace and `)`.
pub fn parse_delegations(text: &str) -> Vec<Delegation> {
    let masked = mask_code_spans(text);
    let chars: Vec<char> = masked.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while let Some(pos) = find_marker(&chars, i) {
        let mut j = pos + MARKER.chars().count();

        // Agent name: everything up to the first comma, trimmed.
        let name_start = j;
        while j < chars.len() && chars[j] != ',' {
            j += 1;
        }
        if j >= chars.len() {
            break; // unterminated — wait for more input
        }
        let agent: String = chars[name_start..j].iter().collect();
        let agent = agent.trim().to_string();
        j += 1; // consume ','

        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }

        let quote = match chars.get(j) {
            Some(&q) if q == '"' || q == '\'' => q,
            _ => {
                // Not a quoted task — skip past this marker and keep looking.
                i = pos + 1;
                continue;
            }
        };
        j += 1;

        // Scan the quoted task, honouring backslash escapes.
        let mut task = String::new();
        let mut closed = false;
        while j < chars.len() {
            let c = chars[j];
            if c == '\\' && j + 1 < chars.len() {
                task.push(unescape(chars[j + 1]));
                j += 2;
                continue;
            }
            if c == quote {
                closed = true;
                j += 1;
                break;
            }
            task.push(c);
            j += 1;
        }
        if !closed {
            break; // quote still streaming
        }

        // Only accept when optional whitespace then ')' follows.
        let mut k = j;
        while k < chars.len() && chars[k].is_whitespace() {
            k += 1;
        }
        if chars.get(k) == Some(&')') && !agent.is_empty() {
            out.push(Delegation { agent, task });
            i = k + 1;
        } else {
            i = pos + 1;
        }
    }

    out
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}

fn find_marker(chars: &[char], from: usize) -> Option<usize> {
    let marker: Vec<char> = MARKER.chars().collect();
    if chars.len() < marker.len() {
        return None;
    }
    (from..=chars.len() - marker.len()).find(|&p| chars[p..p + marker.len()] == marker[..])
}

/// Replace every character inside a code region with a space.
///
/// Two kinds of region are masked: triple-backtick fenced blocks (an
/// unclosed fence masks to end-of-text) and inline single-backtick spans
/// (an unpaired trailing backtick masks nothing).
fn mask_code_spans(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut mask = vec![false; chars.len()];

    // Pass 1: fenced blocks.
    let mut i = 0;
    let mut fence_open: Option<usize> = None;
    while i < chars.len() {
        if chars[i] == '`' && chars.get(i + 1) == Some(&'`') && chars.get(i + 2) == Some(&'`') {
            match fence_open {
                None => fence_open = Some(i),
                Some(start) => {
                    for m in mask.iter_mut().take(i + 3).skip(start) {
                        *m = true;
                    }
                    fence_open = None;
                }
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    if let Some(start) = fence_open {
        for m in mask.iter_mut().skip(start) {
            *m = true;
        }
    }

    // Pass 2: inline spans, over the remaining unmasked text.
    let mut span_open: Option<usize> = None;
    for i in 0..chars.len() {
        if mask[i] || chars[i] != '`' {
            continue;
        }
        match span_open {
            None => span_open = Some(i),
            Some(start) => {
                for m in mask.iter_mut().take(i + 1).skip(start) {
                    *m = true;
                }
                span_open = None;
            }
        }
    }

    chars
        .iter()
        .zip(mask.iter())
        .map(|(&c, &masked)| if masked { ' ' } else { c })
        .collect()
}
