//! Server configuration read from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use actors::{AuthPolicy, CommandTemplate};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_PASSWORD: &str = "password";
pub const DEFAULT_SEPARATOR_CMD: &str = "python -m demucs.separate -n mdx_extra -o {output} {input}";
pub const DEFAULT_ARCHIVER_CMD: &str = "7z a -tzip {archive} {output}/*";
pub const DEFAULT_FFPROBE: &str = "ffprobe";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must name a program")]
    EmptyCommand(&'static str),
}

/// Runtime settings for the separation server.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub auth: AuthPolicy,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub separator: CommandTemplate,
    pub archiver: CommandTemplate,
    pub ffprobe: String,
    /// Unset means tools may run for as long as they need.
    pub tool_timeout: Option<Duration>,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Read configuration from process environment variables.
    ///
    /// - `PORT`, `BIND_ADDR`
    /// - `AUTH_ENABLED`, `AUTH_PASSWORD`
    /// - `INPUT_DIR`, `OUTPUT_DIR`
    /// - `SEPARATOR_CMD`, `ARCHIVER_CMD`, `FFPROBE_BIN`
    /// - `TOOL_TIMEOUT_SECS`, `MAX_UPLOAD_MB`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).and_then(non_empty);

        let port = parse_var("PORT", get("PORT"))?.unwrap_or(DEFAULT_PORT);
        let bind_addr =
            parse_var("BIND_ADDR", get("BIND_ADDR"))?.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let auth = match parse_bool("AUTH_ENABLED", get("AUTH_ENABLED"))? {
            Some(true) => AuthPolicy::Password(
                get("AUTH_PASSWORD").unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            ),
            _ => AuthPolicy::Disabled,
        };

        let separator = command("SEPARATOR_CMD", get("SEPARATOR_CMD"), DEFAULT_SEPARATOR_CMD)?;
        let archiver = command("ARCHIVER_CMD", get("ARCHIVER_CMD"), DEFAULT_ARCHIVER_CMD)?;

        let tool_timeout = match parse_var::<u64>("TOOL_TIMEOUT_SECS", get("TOOL_TIMEOUT_SECS"))? {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };
        let max_upload_mb =
            parse_var("MAX_UPLOAD_MB", get("MAX_UPLOAD_MB"))?.unwrap_or(DEFAULT_MAX_UPLOAD_MB);

        Ok(Self {
            bind_addr,
            port,
            auth,
            input_dir: get("INPUT_DIR").map(PathBuf::from).unwrap_or_else(|| "./in".into()),
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or_else(|| "./out".into()),
            separator,
            archiver,
            ffprobe: get("FFPROBE_BIN").unwrap_or_else(|| DEFAULT_FFPROBE.to_string()),
            tool_timeout,
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_var<T>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value: v,
            })
        })
        .transpose()
}

fn parse_bool(var: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(v) = value else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            var,
            value: v,
            reason: "expected true/false".to_string(),
        }),
    }
}

fn command(
    var: &'static str,
    value: Option<String>,
    default: &str,
) -> Result<CommandTemplate, ConfigError> {
    let line = value.unwrap_or_else(|| default.to_string());
    CommandTemplate::parse(&line).ok_or(ConfigError::EmptyCommand(var))
}
