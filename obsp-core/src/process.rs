// obsp-core/src/process.rs
use std::path::Path;
use std::process::{Command, Output, Stdio};

use obsp_common::error::{ObspError, Result};
use tracing::{debug, error};

/// Runs an external command to completion and captures its output.
///
/// A non-zero exit is not an error here; callers inspect `status` and decide
/// what a failure means for them.
pub fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    envs: &[(&str, &str)],
) -> Result<Output> {
    debug!(
        "Running command: {} {:?} (cwd: {:?}, envs: {:?})",
        program,
        args,
        cwd,
        envs.iter().map(|(k, _)| *k).collect::<Vec<_>>()
    );

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.envs(envs.iter().copied());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null()); // Prevent hanging on stdin

    match cmd.output() {
        Ok(output) => {
            if !output.status.success() {
                debug!("Command failed with status: {}", output.status);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.trim().is_empty() {
                    debug!("Stdout:\n{}", stdout.trim());
                }
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            } else {
                debug!("Command finished successfully.");
            }
            Ok(output)
        }
        Err(e) => {
            error!("Failed to execute {}: {}", program, e);
            Err(ObspError::CommandExecError(format!("{program}: {e}")))
        }
    }
}

/// Last non-empty stderr line, for error messages.
pub fn stderr_tail(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_failure_status() {
        let ok = run_command("sh", &["-c", "echo hello"], None, &[]).unwrap();
        assert!(ok.status.success());
        assert_eq!(String::from_utf8_lossy(&ok.stdout).trim(), "hello");

        let failed = run_command("sh", &["-c", "echo first >&2; echo boom >&2; exit 3"], None, &[])
            .unwrap();
        assert_eq!(failed.status.code(), Some(3));
        assert_eq!(stderr_tail(&failed), "boom");
    }

    #[test]
    fn passes_environment_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_command(
            "sh",
            &["-c", "echo $OBSP_TEST_VAR; pwd"],
            Some(dir.path()),
            &[("OBSP_TEST_VAR", "value")],
        )
        .unwrap();
        let text = String::from_utf8_lossy(&out.stdout);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("value"));
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn missing_program_is_an_exec_error() {
        let err = run_command("obsp-definitely-not-a-program", &[], None, &[]).unwrap_err();
        assert!(matches!(err, ObspError::CommandExecError(_)));
    }
}
