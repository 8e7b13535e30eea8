//! Shell command execution for agents.
//!
//! Commands run through `/bin/sh -c` with the project root as working
//! directory, a 30 second wall-clock timeout, and incremental output capture
//! capped at 1 MiB per stream.  The combined stdout/stderr fed back to the
//! model is cut at 10 000 bytes with a `truncated` marker.
//!
//! A static blocklist of regular expressions is checked before any shell is
//! spawned; a match yields `"Command blocked for security reasons"`.  The
//! blocklist is a stated limitation, not a sandbox — the dispatcher does not
//! attempt to interpret the command further.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Wall-clock limit for one command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on the output text returned to the model.
const MAX_OUTPUT_BYTES: usize = 10_000;
/// Cap on bytes buffered from each of stdout/stderr.
const MAX_BUFFER_BYTES: usize = 1024 * 1024;

lazy_static! {
    /// Patterns that must never reach a shell, matched case-insensitively.
    static ref BLOCKED_COMMANDS: Vec<Regex> = [
        r"rm\s+-rf",
        r"rm\s+.*\/",
        r"curl.*\|.*sh",
        r"wget.*\|.*sh",
        r">\s*\/dev",
        r"dd\s+if=",
        r"mkfs",
        r"format",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("blocklist pattern compiles"))
    .collect();
}

/// Outcome of a completed (non-failed) command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Combined stdout/stderr, cut at [`MAX_OUTPUT_BYTES`].
    pub output: String,
    /// Whether the output was cut at the cap.
    pub truncated: bool,
}

/// Whether `cmd` matches any blocklist pattern.
pub fn is_blocked(cmd: &str) -> bool {
    BLOCKED_COMMANDS.iter().any(|re| re.is_match(cmd))
}

/// Run a shell command with cwd at the project root.
///
/// A non-zero exit code is not an error — the combined output (annotated
/// with the exit code) is returned as a success so the model can react.
/// Only blocked commands, spawn failures, and timeouts produce `Err`.
pub async fn run_command(root: &Path, cmd: &str) -> Result<CommandOutcome, String> {
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return Err("run_command requires a command".to_string());
    }
    if is_blocked(cmd) {
        return Err("Command blocked for security reasons".to_string());
    }

    let work = async {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(root)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn shell: {}", e))?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Read both streams concurrently to avoid pipe-buffer deadlocks.
        let (stdout_bytes, stderr_bytes) = tokio::join!(
            read_capped(stdout_pipe),
            read_capped(stderr_pipe),
        );

        let status = child
            .wait()
            .await
            .map_err(|e| format!("failed to wait for command: {}", e))?;

        let mut combined = String::new();
        combined.push_str(&String::from_utf8_lossy(&stdout_bytes.0));
        if !stderr_bytes.0.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&stderr_bytes.0));
        }
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&format!("(exit code {})", code));
        }

        let buffer_truncated = stdout_bytes.1 || stderr_bytes.1;
        Ok::<_, String>((combined, buffer_truncated))
    };

    let (combined, buffer_truncated) = match tokio::time::timeout(COMMAND_TIMEOUT, work).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(format!(
                "command timed out after {} seconds",
                COMMAND_TIMEOUT.as_secs()
            ))
        }
    };

    let (output, cut) = truncate_output(&combined, MAX_OUTPUT_BYTES);
    Ok(CommandOutcome {
        output,
        truncated: cut || buffer_truncated,
    })
}

/// Read a pipe up to [`MAX_BUFFER_BYTES`], reporting whether the cap was hit.
async fn read_capped<R: AsyncReadExt + Unpin>(reader: Option<R>) -> (Vec<u8>, bool) {
    let mut reader = match reader {
        Some(r) => r,
        None => return (Vec::new(), false),
    };
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return (buf, false),
            Ok(n) => {
                if buf.len() + n > MAX_BUFFER_BYTES {
                    buf.extend_from_slice(&chunk[..MAX_BUFFER_BYTES - buf.len()]);
                    return (buf, true);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Cut `text` at a UTF-8 boundary at or below `limit` bytes.
fn truncate_output(text: &str, limit: usize) -> (String, bool) {
    if text.len() <= limit {
        return (text.to_string(), false);
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}
