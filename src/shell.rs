//! Shell execution for delegation installs.
//!
//! Every bootstrap/install/check/remove snippet runs through `sh -c` with
//! stdout and stderr streamed line-by-line to the current node's output
//! callback. Execution honors the node's cancellation token; on cancel the
//! child is killed and a distinct error is returned without touching
//! state.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::exec::context;

/// How many trailing stderr lines a failure message carries.
const STDERR_TAIL: usize = 5;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{phase} for {resource} exited with {status}{}", fmt_tail(.stderr_tail))]
    Failed {
        resource: String,
        phase: String,
        status: String,
        stderr_tail: Vec<String>,
    },

    #[error("failed to spawn {phase} for {resource}: {source}")]
    Spawn {
        resource: String,
        phase: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} for {resource} was cancelled")]
    Cancelled { resource: String, phase: String },
}

fn fmt_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail.join(" | "))
    }
}

/// One shell invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Resource identity for error messages, e.g. `Tool/gopls`.
    pub resource: String,
    /// Phase label, e.g. `bootstrap install`, `check`, `remove`.
    pub phase: String,
    pub script: String,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<std::path::PathBuf>,
}

impl ExecRequest {
    pub fn new(resource: impl Into<String>, phase: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            phase: phase.into(),
            script: script.into(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }
}

struct Finished {
    success: bool,
    status: String,
    stdout: String,
    stderr_tail: Vec<String>,
}

/// Runs the script to completion; a non-zero exit is an error.
pub async fn run(request: ExecRequest) -> Result<(), ExecError> {
    let resource = request.resource.clone();
    let phase = request.phase.clone();
    let finished = execute(request).await?;
    if finished.success {
        Ok(())
    } else {
        Err(ExecError::Failed {
            resource,
            phase,
            status: finished.status,
            stderr_tail: finished.stderr_tail,
        })
    }
}

/// Runs the script and returns trimmed stdout; a non-zero exit is an
/// error. Used for `resolveVersion` snippets.
pub async fn run_capture(request: ExecRequest) -> Result<String, ExecError> {
    let resource = request.resource.clone();
    let phase = request.phase.clone();
    let finished = execute(request).await?;
    if finished.success {
        Ok(finished.stdout.trim().to_string())
    } else {
        Err(ExecError::Failed {
            resource,
            phase,
            status: finished.status,
            stderr_tail: finished.stderr_tail,
        })
    }
}

/// Runs a check script; the exit status is the answer, not an error.
pub async fn check(request: ExecRequest) -> Result<bool, ExecError> {
    let finished = execute(request).await?;
    Ok(finished.success)
}

async fn execute(request: ExecRequest) -> Result<Finished, ExecError> {
    let cancel = context::cancel_token();
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&request.script)
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &request.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        resource: request.resource.clone(),
        phase: request.phase.clone(),
        source,
    })?;

    let stdout_lines = BufReader::new(child.stdout.take().expect("stdout piped")).lines();
    let stderr_lines = BufReader::new(child.stderr.take().expect("stderr piped")).lines();

    // On cancellation the child is dropped mid-flight; kill_on_drop reaps
    // it, and state is left untouched by the caller.
    let driven = tokio::select! {
        driven = drive(&mut child, stdout_lines, stderr_lines) => driven,
        () = cancel.cancelled() => {
            return Err(ExecError::Cancelled {
                resource: request.resource,
                phase: request.phase,
            });
        }
    };
    let (status, stdout, stderr_tail) = driven.map_err(|source| ExecError::Spawn {
        resource: request.resource.clone(),
        phase: request.phase.clone(),
        source,
    })?;

    Ok(Finished {
        success: status.success(),
        status: status.to_string(),
        stdout,
        stderr_tail,
    })
}

/// Streams both pipes line-by-line to the node context, then waits for the
/// exit status. Returns captured stdout and the stderr tail.
async fn drive(
    child: &mut tokio::process::Child,
    mut stdout_lines: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
    mut stderr_lines: tokio::io::Lines<BufReader<tokio::process::ChildStderr>>,
) -> std::io::Result<(std::process::ExitStatus, String, Vec<String>)> {
    let mut stdout = String::new();
    let mut stderr_tail: Vec<String> = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout_lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    context::report_output(&line);
                    stdout.push_str(&line);
                    stdout.push('\n');
                }
                _ => stdout_open = false,
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    context::report_output(&line);
                    if stderr_tail.len() == STDERR_TAIL {
                        stderr_tail.remove(0);
                    }
                    stderr_tail.push(line);
                }
                _ => stderr_open = false,
            },
        }
    }

    let status = child.wait().await?;
    Ok((status, stdout, stderr_tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_status() {
        let out = run_capture(ExecRequest::new("Tool/x", "resolve version", "echo 1.2.3"))
            .await
            .unwrap();
        assert_eq!(out, "1.2.3");
    }

    #[tokio::test]
    async fn failure_carries_phase_and_stderr_tail() {
        let err = run(ExecRequest::new(
            "Tool/x",
            "install",
            "echo warming up; echo broke >&2; exit 3",
        ))
        .await
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("install for Tool/x"), "{message}");
        assert!(message.contains("broke"), "{message}");
    }

    #[tokio::test]
    async fn check_reports_status_without_error() {
        assert!(check(ExecRequest::new("Tool/x", "check", "true")).await.unwrap());
        assert!(!check(ExecRequest::new("Tool/x", "check", "false")).await.unwrap());
    }

    #[tokio::test]
    async fn environment_is_passed_through() {
        let mut env = BTreeMap::new();
        env.insert("TOMEI_TEST_VALUE".to_string(), "42".to_string());
        let out = run_capture(
            ExecRequest::new("Tool/x", "check", "echo $TOMEI_TEST_VALUE").env(&env),
        )
        .await
        .unwrap();
        assert_eq!(out, "42");
    }
}
