//! Sandboxed project tools.
//!
//! This module provides the fixed tool vocabulary agents may invoke against
//! their bound project directory, and the [`ToolDispatcher`] that executes
//! one [`ToolCall`] at a time with a containment boundary.
//!
//! # Vocabulary
//!
//! | Tool | Arguments | Effect |
//! |---|---|---|
//! | `read_file` | path | return text content |
//! | `write_file` | path, content | create parent dirs, write UTF-8 |
//! | `append_file` | path, content | append, ensuring a newline separator |
//! | `list_dir` | path | listing sorted dirs-first, dotfiles omitted |
//! | `search_files` | glob, query | case-insensitive substring search |
//! | `run_command` | command | shell execution, 30 s timeout, blocklist |
//! | `report_error` | description | structured error-report, no side effect |
//!
//! # Security
//!
//! - Path arguments are normalised (quotes stripped, absolute paths coerced
//!   to project-relative) and the resolved path must canonicalise to a
//!   location under the project root, otherwise the call fails with
//!   `"path traversal not allowed"`.
//! - Commands matching any blocklist pattern are rejected before a shell is
//!   ever spawned.
//! - A non-zero exit code is **not** a failure: the dispatcher returns
//!   success with the combined stdout/stderr so the model can react.  Only
//!   tool-internal errors (filesystem errors, timeouts, containment
//!   violations) set `success = false`.
//!
//! # Example
//!
//! ```rust,no_run
//! use swarmllm::tools::{ToolCall, ToolDispatcher, ToolName};
//! use std::path::PathBuf;
//!
//! # async {
//! let dispatcher = ToolDispatcher::new(PathBuf::from("/projects/demo"));
//! let result = dispatcher
//!     .dispatch(&ToolCall::new(ToolName::ReadFile, vec!["README.md".into()]))
//!     .await;
//! if result.success {
//!     println!("{}", result.output);
//! }
//! # };
//! ```

pub mod filesystem;
pub mod search;
pub mod shell;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Shared base under which all project roots live; absolute paths carrying
/// this prefix are coerced to project-relative.
const SHARED_PROJECTS_PREFIX: &str = "/projects/";

/// The fixed tool vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    ReadFile,
    WriteFile,
    AppendFile,
    ListDir,
    SearchFiles,
    RunCommand,
    ReportError,
}

impl ToolName {
    /// The wire name of the tool as it appears in model output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::AppendFile => "append_file",
            ToolName::ListDir => "list_dir",
            ToolName::SearchFiles => "search_files",
            ToolName::RunCommand => "run_command",
            ToolName::ReportError => "report_error",
        }
    }

    /// Parse a wire name.  Unknown names yield `None` (and are ignored by
    /// the parser).
    pub fn parse(name: &str) -> Option<ToolName> {
        match name {
            "read_file" => Some(ToolName::ReadFile),
            "write_file" => Some(ToolName::WriteFile),
            "append_file" => Some(ToolName::AppendFile),
            "list_dir" => Some(ToolName::ListDir),
            "search_files" => Some(ToolName::SearchFiles),
            "run_command" => Some(ToolName::RunCommand),
            "report_error" => Some(ToolName::ReportError),
            _ => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed tool invocation, transient for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Which tool to run.
    pub name: ToolName,
    /// Positional argument vector (see the module table).
    pub args: Vec<String>,
}

impl ToolCall {
    /// Construct a call.
    pub fn new(name: ToolName, args: Vec<String>) -> Self {
        Self { name, args }
    }

    /// Render the call back into the documented `@tool(args)` inline form.
    ///
    /// Parsing the rendered form yields the same call again (the
    /// round-trip property relied on by prompt documentation and tests).
    pub fn to_invocation(&self) -> String {
        match self.name {
            ToolName::WriteFile | ToolName::AppendFile => format!(
                "@{}({}, \"\"\"{}\"\"\")",
                self.name,
                self.args.first().map(String::as_str).unwrap_or(""),
                self.args.get(1).map(String::as_str).unwrap_or(""),
            ),
            ToolName::SearchFiles => format!(
                "@search_files({}, {})",
                self.args.first().map(String::as_str).unwrap_or(""),
                self.args.get(1).map(String::as_str).unwrap_or(""),
            ),
            _ => {
                let arg = self.args.first().map(String::as_str).unwrap_or("");
                let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
                format!("@{}(\"{}\")", self.name, escaped)
            }
        }
    }
}

/// Outcome of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Wire name of the tool that ran.
    pub tool: String,
    /// The arguments it ran with.
    pub args: Vec<String>,
    /// Whether the tool itself executed without error.
    pub success: bool,
    /// Result text on success (combined stdout/stderr for commands).
    pub output: String,
    /// Error text on failure.
    pub error: Option<String>,
    /// Distinguishes `report_error` signals from real failures.
    #[serde(default)]
    pub is_error_report: bool,
    /// Set when command output was cut at the size cap.
    #[serde(default)]
    pub truncated: bool,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            tool: call.name.as_str().to_string(),
            args: call.args.clone(),
            success: true,
            output: output.into(),
            error: None,
            is_error_report: false,
            truncated: false,
        }
    }

    /// A failed result.
    pub fn err(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool: call.name.as_str().to_string(),
            args: call.args.clone(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            is_error_report: false,
            truncated: false,
        }
    }

    /// An annotated `report_error` result.  Success is true — the report is
    /// a structured signal, not a tool failure.
    pub fn error_report(call: &ToolCall) -> Self {
        let description = call.args.first().cloned().unwrap_or_default();
        Self {
            tool: call.name.as_str().to_string(),
            args: call.args.clone(),
            success: true,
            output: format!("Error report recorded: {}", description),
            error: None,
            is_error_report: true,
            truncated: false,
        }
    }
}

/// Executes [`ToolCall`]s against a bound project root.
///
/// The dispatcher is total: every call produces a [`ToolResult`], never a
/// panic or an `Err`.  It holds no state beyond the root path and can be
/// constructed per turn.
#[derive(Clone)]
pub struct ToolDispatcher {
    project_root: PathBuf,
}

impl ToolDispatcher {
    /// Bind a dispatcher to an absolute project root.
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    /// Execute one call.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if let ToolName::ReportError = call.name {
            return ToolResult::error_report(call);
        }

        // Verify the project root is reachable before touching any tool.
        match std::fs::metadata(&self.project_root) {
            Ok(meta) if meta.is_dir() => {}
            _ => return ToolResult::err(call, "project path not accessible"),
        }

        match call.name {
            ToolName::ReadFile => self.with_path(call, 1, |root, path| {
                filesystem::read_file(root, path)
            }),
            ToolName::WriteFile => self.with_path(call, 2, |root, path| {
                filesystem::write_file(root, path, call.args.get(1).map(String::as_str).unwrap_or(""))
            }),
            ToolName::AppendFile => self.with_path(call, 2, |root, path| {
                filesystem::append_file(root, path, call.args.get(1).map(String::as_str).unwrap_or(""))
            }),
            ToolName::ListDir => self.with_path(call, 1, |root, path| {
                filesystem::list_dir(root, path)
            }),
            ToolName::SearchFiles => {
                let pattern = call.args.first().map(String::as_str).unwrap_or("");
                let query = call.args.get(1).map(String::as_str).unwrap_or("");
                match search::search_files(&self.project_root, pattern, query).await {
                    Ok(output) => ToolResult::ok(call, output),
                    Err(e) => ToolResult::err(call, e),
                }
            }
            ToolName::RunCommand => {
                let cmd = call.args.first().map(String::as_str).unwrap_or("");
                match shell::run_command(&self.project_root, cmd).await {
                    Ok(outcome) => {
                        let mut result = ToolResult::ok(call, outcome.output);
                        result.truncated = outcome.truncated;
                        result
                    }
                    Err(e) => ToolResult::err(call, e),
                }
            }
            ToolName::ReportError => ToolResult::error_report(call),
        }
    }

    /// Resolve the call's path argument and run `op` on it.
    fn with_path<F>(&self, call: &ToolCall, min_args: usize, op: F) -> ToolResult
    where
        F: FnOnce(&Path, &Path) -> Result<String, String>,
    {
        if call.args.len() < min_args {
            return ToolResult::err(
                call,
                format!("{} requires {} argument(s)", call.name, min_args),
            );
        }
        let raw = call.args.first().map(String::as_str).unwrap_or("");
        match self.resolve(raw) {
            Ok(path) => match op(&self.project_root, &path) {
                Ok(output) => ToolResult::ok(call, output),
                Err(e) => ToolResult::err(call, e),
            },
            Err(e) => ToolResult::err(call, e),
        }
    }

    /// Normalise a path argument and enforce the containment boundary.
    ///
    /// Surrounding quotes are stripped; absolute paths are coerced to
    /// project-relative by removing the project-root prefix (or the shared
    /// `/projects/` base); `.` and `..` components are folded; finally the
    /// nearest existing ancestor is canonicalised and checked against the
    /// canonical root, which catches symlink escapes for paths that do not
    /// exist yet.
    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let mut arg = raw.trim();
        for quote in ['"', '\''] {
            if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
                arg = &arg[1..arg.len() - 1];
            }
        }

        let root_str = self.project_root.to_string_lossy();
        let relative = if let Some(rest) = arg.strip_prefix(root_str.as_ref()) {
            rest.trim_start_matches('/')
        } else if let Some(rest) = arg.strip_prefix(SHARED_PROJECTS_PREFIX) {
            rest.trim_start_matches('/')
        } else {
            arg.trim_start_matches('/')
        };

        // Fold `.` and `..` lexically; `..` at the root is an escape attempt
        // that the canonical check below also rejects, but folding keeps the
        // joined path clean for the common case.
        let mut normalized = PathBuf::new();
        let mut escaped = false;
        for component in Path::new(relative).components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        escaped = true;
                    }
                }
                Component::Normal(c) => normalized.push(c),
                Component::CurDir => {}
                _ => {}
            }
        }
        if escaped {
            return Err("path traversal not allowed".to_string());
        }

        let effective = self.project_root.join(&normalized);

        let root_canonical = self
            .project_root
            .canonicalize()
            .map_err(|_| "project path not accessible".to_string())?;

        // Canonicalise the path itself when it exists, otherwise its nearest
        // existing ancestor, and reconstruct the non-existent suffix under it.
        let canonical_to_check = if effective.exists() {
            effective
                .canonicalize()
                .map_err(|_| "path traversal not allowed".to_string())?
        } else {
            let mut ancestor = effective.as_path();
            let existing = loop {
                match ancestor.parent() {
                    Some(parent) if parent.exists() => break parent,
                    Some(parent) => ancestor = parent,
                    None => break self.project_root.as_path(),
                }
            };
            let canonical_parent = existing
                .canonicalize()
                .map_err(|_| "path traversal not allowed".to_string())?;
            let suffix = effective.strip_prefix(existing).unwrap_or(&effective);
            canonical_parent.join(suffix)
        };

        if !canonical_to_check.starts_with(&root_canonical) {
            return Err("path traversal not allowed".to_string());
        }

        Ok(effective)
    }
}
