//! Running the minimega CLI through `/bin/sh`.
//!
//! Cluster commands are passed to `minimega -e` as a single argument, so
//! anything built from experiment data goes through [`shellquote`] first.
//! OVS flow rules carry their own double quotes and depend on it.

use std::process::Stdio;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{AppError, AppResult};

/// Default name of the minimega binary, resolved through `PATH`.
pub const MINIMEGA_CMD: &str = "minimega";

/// Characters that keep a meaning inside double quotes.
static DQUOTE_SPECIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Wraps `s` in double quotes, backslash-escaping `$`, backtick, `"`,
/// `\` and newline.
///
/// ```
/// use phenix_app_common::shell::shellquote;
///
/// assert_eq!(shellquote("vm info"), "\"vm info\"");
/// assert_eq!(shellquote("a\"b"), "\"a\\\"b\"");
/// ```
pub fn shellquote(s: &str) -> String {
    format!("\"{}\"", DQUOTE_SPECIAL_RE.replace_all(s, r"\$1"))
}

/// Captured output of a finished shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// Exit status; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn ok(&self) -> bool {
        self.code == Some(0)
    }

    /// Best text to report on failure: stderr when present, stdout
    /// otherwise (minimega prints its own errors on stdout).
    pub fn message(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Runs `cmd` with `/bin/sh -c`. Only a spawn failure is an error; the
/// exit status is left to the caller.
pub async fn sh(cmd: &str) -> AppResult<ShellOutput> {
    trace!(command = %cmd, "sh");

    let output = Command::new("/bin/sh")
        .args(["-c", cmd])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| AppError::ShellExec {
            command: cmd.to_string(),
            source,
        })?;

    let out = ShellOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
    };

    if !out.ok() {
        debug!(command = %cmd, code = ?out.code, "Shell command exited unsuccessfully");
    }

    Ok(out)
}

/// Runs `cmd` and returns its stdout, failing on a non-zero exit.
pub async fn sh_checked(cmd: &str) -> AppResult<String> {
    let out = sh(cmd).await?;

    if out.ok() {
        return Ok(out.stdout);
    }

    Err(AppError::ShellCommandFailed {
        command: cmd.to_string(),
        exit_code: out.code.unwrap_or(-1),
        output: out.message().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_escapes() {
        assert_eq!(shellquote(""), "\"\"");
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`id`"), "\"\\`id\\`\"");
        assert_eq!(shellquote("a\\b"), "\"a\\\\b\"");
    }

    #[test]
    fn test_shellquote_flow_rule() {
        let input = r#"shell ovs-ofctl add-flow br0 "in_port=nids actions=output:tap7""#;
        assert_eq!(
            shellquote(input),
            r#""shell ovs-ofctl add-flow br0 \"in_port=nids actions=output:tap7\"""#
        );
    }

    #[test]
    fn test_message_prefers_stderr() {
        let mut out = ShellOutput {
            code: Some(1),
            stdout: "from stdout".to_string(),
            stderr: String::new(),
        };
        assert!(!out.ok());
        assert_eq!(out.message(), "from stdout");

        out.stderr = "from stderr".to_string();
        assert_eq!(out.message(), "from stderr");
    }

    #[tokio::test]
    async fn test_sh_round_trips_quoted_argument() {
        let cmd = format!("printf '%s' {}", shellquote(r#"say "hi" $USER"#));
        assert_eq!(sh_checked(&cmd).await.unwrap(), r#"say "hi" $USER"#);
    }

    #[tokio::test]
    async fn test_sh_checked_reports_exit_code() {
        match sh_checked("echo boom >&2; exit 3").await {
            Err(AppError::ShellCommandFailed {
                exit_code, output, ..
            }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
