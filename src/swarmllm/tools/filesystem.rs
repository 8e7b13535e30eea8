//! Filesystem tool operations.
//!
//! These helpers take paths that have already been normalised and
//! containment-checked by the [`ToolDispatcher`](crate::tools::ToolDispatcher);
//! they only perform the I/O and format the result text fed back to the
//! model.  Errors are returned as strings so the dispatcher can wrap them
//! into a [`ToolResult`](crate::tools::ToolResult) without caring about
//! concrete error types.

use std::fs;
use std::io::Write;
use std::path::Path;

/// Read an entire file as UTF-8 text.
pub fn read_file(_root: &Path, path: &Path) -> Result<String, String> {
    if !path.exists() {
        return Err(format!("file not found: {}", display(path, _root)));
    }
    if path.is_dir() {
        return Err(format!("{} is a directory", display(path, _root)));
    }
    fs::read_to_string(path).map_err(|e| format!("read failed: {}", e))
}

/// Write UTF-8 content, creating parent directories as needed.
pub fn write_file(root: &Path, path: &Path, content: &str) -> Result<String, String> {
    if path.exists() && path.is_dir() {
        return Err(format!("{} is a directory", display(path, root)));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("create dir failed: {}", e))?;
    }
    fs::write(path, content).map_err(|e| format!("write failed: {}", e))?;
    Ok(format!(
        "Wrote {} bytes to {}",
        content.len(),
        display(path, root)
    ))
}

/// Append UTF-8 content, inserting a newline separator when the existing
/// content does not end with one.
pub fn append_file(root: &Path, path: &Path, content: &str) -> Result<String, String> {
    if path.exists() && path.is_dir() {
        return Err(format!("{} is a directory", display(path, root)));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("create dir failed: {}", e))?;
    }

    let needs_separator = match fs::read_to_string(path) {
        Ok(existing) => !existing.is_empty() && !existing.ends_with('\n'),
        Err(_) => false,
    };

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("open failed: {}", e))?;
    if needs_separator {
        file.write_all(b"\n")
            .map_err(|e| format!("append failed: {}", e))?;
    }
    file.write_all(content.as_bytes())
        .map_err(|e| format!("append failed: {}", e))?;

    Ok(format!(
        "Appended {} bytes to {}",
        content.len(),
        display(path, root)
    ))
}

/// List a directory: directories first, then files, each group sorted by
/// name, dotfiles omitted.
pub fn list_dir(root: &Path, path: &Path) -> Result<String, String> {
    if !path.exists() {
        return Err(format!("directory not found: {}", display(path, root)));
    }
    if !path.is_dir() {
        return Err(format!("{} is not a directory", display(path, root)));
    }

    let mut entries: Vec<(bool, String, u64)> = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| format!("list failed: {}", e))? {
        let entry = entry.map_err(|e| format!("list failed: {}", e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let meta = entry.metadata().map_err(|e| format!("list failed: {}", e))?;
        let size = if meta.is_dir() { 0 } else { meta.len() };
        entries.push((meta.is_dir(), name, size));
    }

    // dirs first, then names; `!is_dir` sorts directories ahead.
    entries.sort_by(|a, b| (!a.0, a.1.to_lowercase()).cmp(&(!b.0, b.1.to_lowercase())));

    if entries.is_empty() {
        return Ok("(empty directory)".to_string());
    }

    let lines: Vec<String> = entries
        .into_iter()
        .map(|(is_dir, name, size)| {
            if is_dir {
                format!("{}/", name)
            } else {
                format!("{} ({} bytes)", name, size)
            }
        })
        .collect();
    Ok(lines.join("\n"))
}

/// Render a path relative to the project root for messages shown to the
/// model.
fn display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes/a.txt");
        let msg = write_file(dir.path(), &path, "hello").unwrap();
        assert_eq!(msg, "Wrote 5 bytes to notes/a.txt");
        assert_eq!(read_file(dir.path(), &path).unwrap(), "hello");
    }

    #[test]
    fn test_append_inserts_separator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        write_file(dir.path(), &path, "first line").unwrap();
        append_file(dir.path(), &path, "second line").unwrap();
        assert_eq!(
            read_file(dir.path(), &path).unwrap(),
            "first line\nsecond line"
        );
    }

    #[test]
    fn test_append_keeps_existing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        write_file(dir.path(), &path, "first\n").unwrap();
        append_file(dir.path(), &path, "second").unwrap();
        assert_eq!(read_file(dir.path(), &path).unwrap(), "first\nsecond");
    }

    #[test]
    fn test_list_dir_sorted_dirs_first_no_dotfiles() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("zeta")).unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("alpha.txt"), "aa").unwrap();
        fs::write(dir.path().join(".env"), "x").unwrap();

        let listing = list_dir(dir.path(), dir.path()).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines, vec!["zeta/", "alpha.txt (2 bytes)"]);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_file(dir.path(), &dir.path().join("nope.txt")).unwrap_err();
        assert!(err.contains("not found"));
    }
}
