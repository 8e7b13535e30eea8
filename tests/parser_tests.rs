//! Cross-cutting parser properties.

use swarmllm::delegation::parse_delegations;
use swarmllm::tool_parser::parse_tool_calls;
use swarmllm::tools::{ToolCall, ToolName};

/// Prepending a fenced block full of delegation-shaped noise never changes
/// what the parser extracts from the real text.
#[test]
fn test_fenced_prefix_invariance() {
    let real_texts = [
        "@delegate(QA, \"run tests\")",
        "prose only, no commands",
        "two: @delegate(A, 'x') then @delegate(B, \"y\")",
    ];
    let noise = "```\n@delegate(Anyone, \"anything\")\n@delegate(Else, 'more')\n```\n";

    for text in real_texts {
        let plain = parse_delegations(text);
        let noisy = parse_delegations(&format!("{}{}", noise, text));
        assert_eq!(plain, noisy, "noise changed the parse of {:?}", text);
    }
}

/// Parsing, re-serialising through the documented `@tool(args)` form, and
/// re-parsing yields the same ordered sequence.
#[test]
fn test_tool_call_round_trip() {
    let original = vec![
        ToolCall::new(ToolName::ReadFile, vec!["src/lib.rs".into()]),
        ToolCall::new(ToolName::ListDir, vec!["src".into()]),
        ToolCall::new(
            ToolName::WriteFile,
            vec!["out.txt".into(), "multi\nline\ncontent".into()],
        ),
        ToolCall::new(ToolName::SearchFiles, vec!["*.toml".into(), "version".into()]),
        ToolCall::new(ToolName::RunCommand, vec!["cargo fetch --locked".into()]),
        ToolCall::new(ToolName::ReportError, vec!["cannot find Cargo.toml".into()]),
    ];

    let rendered: Vec<String> = original.iter().map(|c| c.to_invocation()).collect();
    let reparsed = parse_tool_calls(&rendered.join("\n\n"));
    assert_eq!(original, reparsed);
}

/// Delegations and tool calls coexist: the tool parser must not eat
/// `@delegate` and vice versa.
#[test]
fn test_parsers_do_not_cross_match() {
    let text = "@delegate(Dev, \"use @read_file(a.txt) to inspect\")\n@list_dir(\"src\")";

    let delegations = parse_delegations(text);
    assert_eq!(delegations.len(), 1);
    assert_eq!(delegations[0].task, "use @read_file(a.txt) to inspect");

    let tools = parse_tool_calls(text);
    // The read_file inside the quoted task is still textual output of the
    // tool parser's single pass — but list_dir must always be present.
    assert!(tools.iter().any(|c| c.name == ToolName::ListDir));
}

/// The delegation parser only fires on complete commands, so a stream
/// prefix never yields a command that the full text would not.
#[test]
fn test_streaming_prefix_soundness() {
    let full = "thinking...\n@delegate(Developer, \"implement \\\"quote\\\" handling\")\ndone";
    let complete = parse_delegations(full);
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].task, "implement \"quote\" handling");

    for end in (0..full.len()).filter(|e| full.is_char_boundary(*e)) {
        let prefix_parse = parse_delegations(&full[..end]);
        for delegation in prefix_parse {
            assert!(complete.contains(&delegation));
        }
    }
}
