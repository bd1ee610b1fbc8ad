//! ImageMagick subprocess runner.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use attache_core::defaults::COMMAND_TIMEOUT_SECS;
use attache_core::{CommandRunner, Error, Result};

/// Runs ImageMagick tools (`convert`, `identify`) as subprocesses.
///
/// With ImageMagick 7 the tools are subcommands of a single `magick`
/// binary; enable that with [`ImageMagick::with_magick_prefix`].
#[derive(Debug, Clone)]
pub struct ImageMagick {
    binary_dir: Option<PathBuf>,
    magick_prefix: bool,
    timeout_secs: u64,
}

impl Default for ImageMagick {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageMagick {
    pub fn new() -> Self {
        Self {
            binary_dir: None,
            magick_prefix: false,
            timeout_secs: COMMAND_TIMEOUT_SECS,
        }
    }

    /// Configure from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `IMAGEMAGICK_DIR` | directory holding the binaries (default: `PATH`) |
    /// | `IMAGEMAGICK_V7` | `true` to run tools through `magick` |
    /// | `IMAGEMAGICK_TIMEOUT_SECS` | per-command timeout |
    pub fn from_env() -> Self {
        let mut runner = Self::new();
        if let Ok(dir) = std::env::var("IMAGEMAGICK_DIR") {
            runner.binary_dir = Some(PathBuf::from(dir));
        }
        runner.magick_prefix = std::env::var("IMAGEMAGICK_V7")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if let Some(secs) = std::env::var("IMAGEMAGICK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            runner.timeout_secs = secs;
        }
        runner
    }

    pub fn with_binary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binary_dir = Some(dir.into());
        self
    }

    pub fn with_magick_prefix(mut self) -> Self {
        self.magick_prefix = true;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn binary(&self, name: &str) -> PathBuf {
        match &self.binary_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = if self.magick_prefix {
            let mut cmd = Command::new(self.binary("magick"));
            cmd.arg(program);
            cmd
        } else {
            Command::new(self.binary(program))
        };
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    /// Whether `identify` can be executed.
    pub async fn is_available(&self) -> bool {
        match self.command("identify", &["-version".to_string()]).output().await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl CommandRunner for ImageMagick {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();
        let mut cmd = self.command(program, args);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| {
                Error::CommandLine(format!(
                    "{} timed out after {}s",
                    program, self.timeout_secs
                ))
            })?
            .map_err(|e| Error::CommandLine(format!("Failed to execute {}: {}", program, e)))?;

        debug!(
            subsystem = "imaging",
            component = "command",
            op = "run",
            program,
            exit = ?output.status.code(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CommandLine(format!(
                "{} failed ({}): {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
