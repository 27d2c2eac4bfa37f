//! External process invocation
//!
//! Provides a trait for running external programs, with:
//! - Real implementation using tokio::process
//! - Mock implementation for testing
//! - Timeout enforcement

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// A program to run. Stdin is always closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args...]` command line.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    /// Program name for logging
    pub fn display_name(&self) -> &str {
        &self.program
    }
}

/// Output from a finished process
#[derive(Debug, Clone)]
pub struct Output {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Error during invocation
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command not found: {0}")]
    NotFound(String),

    #[error("`{program}` timed out after {seconds} seconds")]
    Timeout { program: String, seconds: u64 },
}

/// Trait for process execution (testable)
#[async_trait]
pub trait CliInvoker: Send + Sync {
    async fn invoke(&self, invocation: &Invocation) -> Result<Output, InvokeError>;
}

/// Real invoker using tokio::process
#[derive(Debug, Default, Clone, Copy)]
pub struct RealInvoker;

#[async_trait]
impl CliInvoker for RealInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<Output, InvokeError> {
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => InvokeError::NotFound(invocation.program.clone()),
                _ => InvokeError::Io(e),
            })?;

        let output = child.wait_with_output().await?;

        Ok(Output {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Mock invoker for testing
///
/// Replays queued responses in order and records every invocation.
#[derive(Default)]
pub struct MockInvoker {
    responses: Mutex<VecDeque<Result<Output, InvokeError>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response to return on the next invocation
    pub fn add_response(&self, output: Output) {
        self.responses.lock().unwrap().push_back(Ok(output));
    }

    pub fn add_error(&self, error: InvokeError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CliInvoker for MockInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<Output, InvokeError> {
        self.calls.lock().unwrap().push(invocation.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Output::success("")))
    }
}

/// Execute with timeout
pub async fn execute_with_timeout(
    invoker: &dyn CliInvoker,
    invocation: &Invocation,
    timeout: Duration,
) -> Result<Output, InvokeError> {
    match tokio::time::timeout(timeout, invoker.invoke(invocation)).await {
        Ok(result) => result,
        Err(_) => Err(InvokeError::Timeout {
            program: invocation.program.clone(),
            seconds: timeout.as_secs(),
        }),
    }
}
