//! External tool runner trait and its process-backed implementation.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use stem_core::ToolStage;
use tokio::process::Command;

/// Placeholder replaced by the input audio path.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced by the job's output directory.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Placeholder replaced by the archive path.
pub const ARCHIVE_PLACEHOLDER: &str = "{archive}";

/// Bytes of stderr kept in a failure report.
const STDERR_TAIL: usize = 2048;

/// Future type for tool invocations.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ToolError>> + Send + 'a>>;

/// Runs the separation and archive tools.
///
/// Implementations must not retry: a failure is terminal for the job.
pub trait ToolRunner: Send + Sync + 'static {
    /// Separate `input` into stems written below `output_dir`.
    fn run_separation<'a>(&'a self, input: &'a Path, output_dir: &'a Path) -> ToolFuture<'a>;

    /// Package `output_dir` into a zip at `archive`.
    fn run_archive<'a>(&'a self, output_dir: &'a Path, archive: &'a Path) -> ToolFuture<'a>;
}

/// Error from an external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{stage}: failed to start {program}: {source}")]
    Spawn {
        stage: ToolStage,
        program: String,
        source: std::io::Error,
    },

    #[error("{stage}: failed waiting for tool: {source}")]
    Wait {
        stage: ToolStage,
        source: std::io::Error,
    },

    #[error("{stage}: tool exited with {code:?}: {stderr}")]
    Failed {
        stage: ToolStage,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{stage}: tool timed out after {after:?}")]
    TimedOut { stage: ToolStage, after: Duration },
}

impl ToolError {
    pub fn stage(&self) -> ToolStage {
        match self {
            ToolError::Spawn { stage, .. }
            | ToolError::Wait { stage, .. }
            | ToolError::Failed { stage, .. }
            | ToolError::TimedOut { stage, .. } => *stage,
        }
    }
}

/// A program plus an argument template with `{input}`-style placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line. Returns `None` if empty.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Substitute placeholders in every argument.
    pub fn render(&self, vars: &[(&str, &Path)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, path)| {
                    acc.replace(key, &path.to_string_lossy())
                })
            })
            .collect()
    }
}

/// Shells out to configured executables.
#[derive(Debug, Clone)]
pub struct CommandToolRunner {
    separator: CommandTemplate,
    archiver: CommandTemplate,
    timeout: Option<Duration>,
}

impl CommandToolRunner {
    pub fn new(separator: CommandTemplate, archiver: CommandTemplate) -> Self {
        Self {
            separator,
            archiver,
            timeout: None,
        }
    }

    /// Kill a tool that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn execute(
        &self,
        stage: ToolStage,
        template: &CommandTemplate,
        vars: [(&str, &Path); 2],
    ) -> Result<(), ToolError> {
        let args = template.render(&vars);
        tracing::info!(%stage, program = template.program(), ?args, "Running external tool");

        let child = Command::new(template.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                stage,
                program: template.program().to_string(),
                source,
            })?;

        let waited = match self.timeout {
            Some(after) => tokio::time::timeout(after, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut { stage, after })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| ToolError::Wait { stage, source })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                stage,
                code: output.status.code(),
                stderr: tail(&output.stderr),
            });
        }

        tracing::debug!(%stage, stdout = %String::from_utf8_lossy(&output.stdout), "Tool finished");
        Ok(())
    }
}

impl ToolRunner for CommandToolRunner {
    fn run_separation<'a>(&'a self, input: &'a Path, output_dir: &'a Path) -> ToolFuture<'a> {
        Box::pin(self.execute(
            ToolStage::Separation,
            &self.separator,
            [(INPUT_PLACEHOLDER, input), (OUTPUT_PLACEHOLDER, output_dir)],
        ))
    }

    fn run_archive<'a>(&'a self, output_dir: &'a Path, archive: &'a Path) -> ToolFuture<'a> {
        Box::pin(self.execute(
            ToolStage::Archive,
            &self.archiver,
            [(OUTPUT_PLACEHOLDER, output_dir), (ARCHIVE_PLACEHOLDER, archive)],
        ))
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((idx, _)) => text[idx..].to_string(),
        None => text.to_string(),
    }
}
