//! Duration probing of uploaded audio.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;

/// Future type for duration probes.
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<f64, ProbeError>> + Send + 'a>>;

/// Reports the playback duration of a media file in seconds.
pub trait DurationProbe: Send + Sync + 'static {
    fn probe<'a>(&'a self, path: &'a Path) -> ProbeFuture<'a>;
}

/// Probe errors.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("probe exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("unreadable duration {0:?}")]
    Parse(String),
}

/// Probe backed by `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    program: String,
}

impl FfprobeDurationProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, path: &Path) -> Result<f64, ProbeError> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for FfprobeDurationProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl DurationProbe for FfprobeDurationProbe {
    fn probe<'a>(&'a self, path: &'a Path) -> ProbeFuture<'a> {
        Box::pin(self.run(path))
    }
}

/// Parse ffprobe's bare `format=duration` output.
pub fn parse_duration(raw: &str) -> Result<f64, ProbeError> {
    let text = raw.trim();
    match text.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        _ => Err(ProbeError::Parse(text.to_string())),
    }
}
