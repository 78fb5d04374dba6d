//! Process management utilities
//!
//! Thin wrappers around `std::process::Command` for the CLI-backed keyrings.

use std::ffi::OsStr;
use std::io::{self, Write};
use std::process::{Command, Stdio};

/// Check if an executable is available on PATH
pub fn is_installed(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stdout
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// stdout and stderr together, for error reporting and pattern checks
    pub fn combined(&self) -> String {
        let mut all = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !all.is_empty() {
                all.push('\n');
            }
            all.push_str(err);
        }
        all
    }
}

/// Run a command with every stream captured, optionally feeding `input` on stdin
pub fn capture<I, S>(program: &str, args: I, input: Option<&str>) -> io::Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(program, "spawning");
    let mut child = cmd.spawn()?;

    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
    }

    let output = child.wait_with_output()?;
    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a command capturing only stdout; stdin and stderr stay on the terminal
/// so the program can prompt the user.
pub fn capture_interactive<I, S>(program: &str, args: I) -> io::Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    tracing::debug!(program, "spawning interactive");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::new(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_capture_feeds_stdin() {
        let out = capture("cat", std::iter::empty::<&str>(), Some("hello")).unwrap();
        assert!(out.success);
        assert_eq!(out.text(), "hello");
    }

    #[test]
    fn test_capture_reports_failure() {
        let out = capture("sh", ["-c", "echo oops >&2; exit 3"], None).unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.combined(), "oops");
    }

    #[test]
    fn test_missing_program_is_io_error() {
        assert!(capture("definitely-not-a-real-binary-xyz", ["x"], None).is_err());
        assert!(!is_installed("definitely-not-a-real-binary-xyz"));
    }
}
