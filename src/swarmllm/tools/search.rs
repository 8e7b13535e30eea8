//! Project-wide file search.
//!
//! Case-insensitive substring search across files whose project-relative
//! path matches a glob pattern.  Output is capped at the first 20 matching
//! files with up to 5 matching lines each, and the whole search runs under
//! a 10 second budget (5 seconds per file read) so a runaway pattern can
//! never stall a turn.

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_FILES: usize = 20;
const MAX_LINES_PER_FILE: usize = 5;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const FILE_TIMEOUT: Duration = Duration::from_secs(5);

/// Search `root` for files matching `pattern` whose content contains
/// `query` (case-insensitive).
///
/// Returns a formatted block of `path:line: text` matches, or the literal
/// `"No matches found"` when nothing matched.
pub async fn search_files(root: &Path, pattern: &str, query: &str) -> Result<String, String> {
    let pattern = pattern.trim();
    let query = query.trim().to_lowercase();
    if pattern.is_empty() {
        return Err("search_files requires a glob pattern".to_string());
    }

    // Bare patterns like `*.rs` are matched against every path component,
    // so `src/main.rs` is found without requiring an explicit `**/` prefix.
    let compiled = Pattern::new(pattern).map_err(|e| format!("invalid glob pattern: {}", e))?;
    let recursive = Pattern::new(&format!("**/{}", pattern)).ok();

    let root = root.to_path_buf();
    match tokio::time::timeout(SEARCH_TIMEOUT, run_search(root, compiled, recursive, query)).await {
        Ok(result) => result,
        Err(_) => Err("search timed out".to_string()),
    }
}

async fn run_search(
    root: PathBuf,
    pattern: Pattern,
    recursive: Option<Pattern>,
    query: String,
) -> Result<String, String> {
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::default()
    };

    let mut candidates = Vec::new();
    collect_files(&root, &root, &mut candidates);
    candidates.sort();

    let mut sections = Vec::new();
    for rel in candidates {
        if sections.len() >= MAX_FILES {
            break;
        }
        let rel_str = rel.to_string_lossy();
        let matches_glob = pattern.matches_with(&rel_str, options)
            || recursive
                .as_ref()
                .map(|p| p.matches_with(&rel_str, options))
                .unwrap_or(false);
        if !matches_glob {
            continue;
        }

        let full = root.join(&rel);
        let content =
            match tokio::time::timeout(FILE_TIMEOUT, tokio::fs::read_to_string(&full)).await {
                Ok(Ok(content)) => content,
                // Binary or unreadable files are skipped, not fatal.
                Ok(Err(_)) => continue,
                Err(_) => continue,
            };

        let mut lines = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if lines.len() >= MAX_LINES_PER_FILE {
                break;
            }
            if line.to_lowercase().contains(&query) {
                lines.push(format!("  {}: {}", number + 1, line.trim_end()));
            }
        }
        if !lines.is_empty() {
            sections.push(format!("{}:\n{}", rel_str, lines.join("\n")));
        }
    }

    if sections.is_empty() {
        Ok("No matches found".to_string())
    } else {
        Ok(sections.join("\n\n"))
    }
}

/// Recursively collect project-relative file paths, skipping dotted entries.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
}
