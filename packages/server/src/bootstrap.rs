//! First-start preparation of the working directories and tool checks.

use std::env;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Create the input and output directories and report missing tools.
///
/// A missing tool is only a warning: jobs fail with a tool error until it
/// is installed.
pub async fn prepare(config: &Config) -> std::io::Result<()> {
    for dir in [&config.input_dir, &config.output_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let tools = [
        config.separator.program(),
        config.archiver.program(),
        config.ffprobe.as_str(),
    ];
    for tool in tools {
        match find_program(tool) {
            Some(path) => tracing::debug!("Found {} at {:?}", tool, path),
            None => tracing::warn!("'{}' not found in PATH; jobs needing it will fail", tool),
        }
    }
    Ok(())
}

/// Resolve a program name the way a shell would.
pub fn find_program(tool: &str) -> Option<PathBuf> {
    let direct = Path::new(tool);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }

    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let full = dir.join(tool);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{tool}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}
