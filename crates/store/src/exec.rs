//! Injectable command execution for CLI-wrapped backends.
//!
//! Backends that shell out (`op`, `bw`, `doppler`, `pass`) never touch
//! `tokio::process` directly; they go through [`CommandExecutor`] so tests
//! can script responses with [`ScriptedExecutor`] instead of spawning real
//! processes.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use umbra_error::{Result, UmbraError, wrap_command_not_found};

use crate::context::OpContext;

/// One process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Binary to invoke.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Extra environment entries for the child.
    pub env: Vec<(String, String)>,
    /// Data written to the child's stdin, when present.
    pub stdin: Option<String>,
    /// Per-call timeout. `None` means no timeout at all.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// A spec for `program` with the given arguments and no timeout.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    /// Return a copy with an environment entry added.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Return a copy with a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// True for a zero exit code.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs commands; implementations are injectable.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command to completion, capturing output.
    ///
    /// A missing binary is a `Command` error with an install hint; a nonzero
    /// exit is **not** an error here — backends interpret exit status and
    /// stderr themselves.
    async fn run(&self, ctx: &OpContext, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Executor backed by real processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// The system executor.
    pub fn new() -> Self {
        Self
    }

    async fn spawn_and_wait(spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                wrap_command_not_found(&spec.program, e)
            } else {
                UmbraError::command(&spec.program, None, format!("failed to spawn: {e}"))
                    .with_source(e)
            }
        })?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await.map_err(|e| {
                    UmbraError::command(&spec.program, None, format!("failed to write stdin: {e}"))
                        .with_source(e)
                })?;
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            UmbraError::command(&spec.program, None, format!("failed to wait: {e}")).with_source(e)
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, ctx: &OpContext, spec: &CommandSpec) -> Result<CommandOutput> {
        ctx.ensure_live(&spec.program)?;
        let work = Self::spawn_and_wait(spec);
        match spec.timeout {
            // Explicit per-call timeout; zero was normalized to None upstream.
            Some(timeout) => tokio::select! {
                () = ctx.cancellation_token().cancelled() => Err(UmbraError::cancelled(&spec.program)),
                () = tokio::time::sleep(timeout) => Err(UmbraError::timeout(&spec.program, timeout)),
                result = work => result,
            },
            None => tokio::select! {
                () = ctx.cancellation_token().cancelled() => Err(UmbraError::cancelled(&spec.program)),
                result = work => result,
            },
        }
    }
}

/// One scripted reply for [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Return this output.
    Output(CommandOutput),
    /// Fail the call with this error.
    Error(UmbraError),
}

/// Executor that replays scripted responses and records every call.
///
/// Responses are consumed in FIFO order; running out of script is a test
/// bug and fails loudly.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    /// An executor with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful invocation printing `stdout`.
    pub fn respond_stdout(&self, stdout: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .push_back(ScriptedResponse::Output(CommandOutput {
                status: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
            }));
        self
    }

    /// Queue a failing invocation with an exit code and stderr.
    pub fn respond_failure(&self, status: i32, stderr: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .push_back(ScriptedResponse::Output(CommandOutput {
                status: Some(status),
                stdout: String::new(),
                stderr: stderr.into(),
            }));
        self
    }

    /// Queue an executor-level error (spawn failure, timeout).
    pub fn respond_error(&self, err: UmbraError) -> &Self {
        self.responses.lock().push_back(ScriptedResponse::Error(err));
        self
    }

    /// Every spec this executor has been asked to run, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, ctx: &OpContext, spec: &CommandSpec) -> Result<CommandOutput> {
        ctx.ensure_live(&spec.program)?;
        self.calls.lock().push(spec.clone());
        match self.responses.lock().pop_front() {
            Some(ScriptedResponse::Output(output)) => Ok(output),
            Some(ScriptedResponse::Error(err)) => Err(err),
            None => panic!("ScriptedExecutor ran out of responses for: {spec:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_executor_replays_in_order() {
        let exec = ScriptedExecutor::new();
        exec.respond_stdout("first").respond_failure(1, "boom");

        let ctx = OpContext::new();
        let spec = CommandSpec::new("bw", ["get", "password", "item"]);

        let first = exec.run(&ctx, &spec).await.unwrap();
        assert!(first.success());
        assert_eq!(first.stdout, "first");

        let second = exec.run(&ctx, &spec).await.unwrap();
        assert!(!second.success());
        assert_eq!(second.stderr, "boom");

        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn system_executor_reports_missing_binary_with_hint() {
        let exec = SystemExecutor::new();
        let ctx = OpContext::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary-umbra", ["x"]);
        let err = exec.run(&ctx, &spec).await.unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Command { .. }));
        assert!(err.render().contains("PATH") || err.render().contains("install"));
    }
}
