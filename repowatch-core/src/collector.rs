//! Backup engine inventory collection
//!
//! Runs the configured inventory commands and turns their output into
//! per-repository facts. Two output shapes are accepted:
//!
//! - a JSON array of facts (`[{"repositoryName": "..", "lastSave": 0}]`,
//!   `[{"name": "..", "size": 0}]`)
//! - plain lines of `<value> <path>`, as printed by `find -printf '%T@ %p\n'`
//!   or `du -s`
//!
//! A call either returns every fact or fails; there is no partial result.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::CollectorConfig;
use crate::invoker::{execute_with_timeout, CliInvoker, InvokeError, Invocation};
use crate::model::{LastSaveFact, StorageFact};

/// Output line that could not be understood
#[derive(Error, Debug, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("no {0} command configured")]
    NotConfigured(&'static str),

    #[error("failed to run `{program}`: {source}")]
    Invoke {
        program: String,
        source: InvokeError,
    },

    #[error("`{program}` exited with status {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("unparsable output from `{program}`: {source}")]
    Parse {
        program: String,
        source: ParseError,
    },
}

/// Source of ground-truth repository state.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect_last_saves(&self) -> Result<Vec<LastSaveFact>, CollectError>;
    async fn collect_storage_usage(&self) -> Result<Vec<StorageFact>, CollectError>;
}

/// Collector that shells out to the host's inventory commands
pub struct ShellCollector {
    invoker: Arc<dyn CliInvoker>,
    config: CollectorConfig,
}

impl ShellCollector {
    pub fn new(invoker: Arc<dyn CliInvoker>, config: CollectorConfig) -> Self {
        Self { invoker, config }
    }

    async fn run(&self, what: &'static str, command: &[String]) -> Result<String, CollectError> {
        let invocation = Invocation::from_command(command).ok_or(CollectError::NotConfigured(what))?;
        let program = invocation.display_name().to_string();
        let started = Instant::now();

        let output = execute_with_timeout(self.invoker.as_ref(), &invocation, self.config.timeout())
            .await
            .map_err(|source| CollectError::Invoke {
                program: program.clone(),
                source,
            })?;

        if output.status != 0 {
            return Err(CollectError::NonZeroExit {
                program,
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        tracing::debug!(
            collection = what,
            program = %program,
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = output.stdout.len(),
            "inventory command finished"
        );
        Ok(output.stdout)
    }
}

#[async_trait]
impl Collector for ShellCollector {
    async fn collect_last_saves(&self) -> Result<Vec<LastSaveFact>, CollectError> {
        let stdout = self.run("last-save", &self.config.last_save_command).await?;
        parse_last_saves(&stdout).map_err(|source| CollectError::Parse {
            program: self.config.last_save_command[0].clone(),
            source,
        })
    }

    async fn collect_storage_usage(&self) -> Result<Vec<StorageFact>, CollectError> {
        let stdout = self.run("storage", &self.config.storage_command).await?;
        parse_storage_usage(&stdout).map_err(|source| CollectError::Parse {
            program: self.config.storage_command[0].clone(),
            source,
        })
    }
}

/// Parse last-save output: JSON facts or `<unix-seconds> <path>` lines.
pub fn parse_last_saves(output: &str) -> Result<Vec<LastSaveFact>, ParseError> {
    if let Some(facts) = parse_json_array(output)? {
        return Ok(facts);
    }

    parse_lines(output, |line, value, path| {
        // `find -printf %T@` prints fractional seconds
        let whole = value.split('.').next().unwrap_or(value);
        let last_save = whole
            .parse::<i64>()
            .map_err(|_| ParseError::new(line, format!("invalid timestamp '{}'", value)))?;
        Ok(LastSaveFact {
            repository_name: repository_name_from_path(path),
            last_save,
        })
    })
}

/// Parse storage output: JSON facts or `du -s` style `<size> <path>` lines.
pub fn parse_storage_usage(output: &str) -> Result<Vec<StorageFact>, ParseError> {
    if let Some(facts) = parse_json_array(output)? {
        return Ok(facts);
    }

    parse_lines(output, |line, value, path| {
        let size = value
            .parse::<u64>()
            .map_err(|_| ParseError::new(line, format!("invalid size '{}'", value)))?;
        Ok(StorageFact {
            name: repository_name_from_path(path),
            size,
        })
    })
}

fn parse_json_array<T: DeserializeOwned>(output: &str) -> Result<Option<Vec<T>>, ParseError> {
    let trimmed = output.trim_start();
    if !trimmed.starts_with('[') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| ParseError::new(e.line(), e.to_string()))
}

fn parse_lines<T>(
    output: &str,
    mut parse: impl FnMut(usize, &str, &str) -> Result<T, ParseError>,
) -> Result<Vec<T>, ParseError> {
    let mut facts = Vec::new();

    for (idx, raw) in output.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let (value, path) = line
            .split_once(char::is_whitespace)
            .map(|(v, p)| (v, p.trim()))
            .filter(|(_, p)| !p.is_empty())
            .ok_or_else(|| ParseError::new(idx + 1, "expected '<value> <path>'"))?;

        facts.push(parse(idx + 1, value, path)?);
    }

    Ok(facts)
}

/// Repository name for an inventory path.
///
/// `/repos/abc123` and `/repos/abc123/integrity.42` both name `abc123`.
pub fn repository_name_from_path(path: &str) -> String {
    let path = Path::new(path.trim_end_matches('/'));
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();

    if file_name.starts_with("integrity.") {
        if let Some(parent) = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
        {
            return parent.to_string();
        }
    }

    file_name.to_string()
}
