//! Transport configuration.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::frame::DEFAULT_MAX_FRAME_LEN;

/// Environment variable naming the worker executable.
pub const WORKER_PATH_ENV: &str = "OUTPOST_WORKER_PATH";

/// Environment variable overriding the maximum frame size in bytes.
pub const MAX_FRAME_ENV: &str = "OUTPOST_MAX_FRAME_BYTES";

/// Name of the bundled worker executable.
pub const WORKER_BINARY: &str = "outpost-worker";

/// Settings for thread-backed workers.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// Prefix for worker thread names; a sequence number is appended.
    pub name_prefix: String,
    /// Stack size for worker threads. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            name_prefix: WORKER_BINARY.to_string(),
            stack_size: None,
        }
    }
}

impl ThreadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// Settings for process-backed workers.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Explicit worker executable. When unset the binary is discovered.
    pub worker_path: Option<PathBuf>,
    /// Extra arguments appended after `--entry <name>`.
    pub args: Vec<String>,
    /// Extra environment variables for the worker.
    pub env: Vec<(String, String)>,
    /// Largest frame either side will accept.
    pub max_frame_len: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            args: Vec::new(),
            env: Vec::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ProcessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `OUTPOST_WORKER_PATH` and `OUTPOST_MAX_FRAME_BYTES`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            config.worker_path = Some(PathBuf::from(path));
        }

        if let Ok(raw) = std::env::var(MAX_FRAME_ENV) {
            config.max_frame_len = parse_max_frame_len(&raw)?;
        }

        Ok(config)
    }

    pub fn with_worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_max_frame_len(mut self, bytes: usize) -> Self {
        self.max_frame_len = bytes;
        self
    }

    /// Find the worker binary path.
    ///
    /// Looks in the following order:
    /// 1. The configured `worker_path`
    /// 2. `OUTPOST_WORKER_PATH` environment variable
    /// 3. Same directory as the current executable
    /// 4. System PATH
    /// 5. `target/debug` or `target/release` during development
    pub fn resolve_worker_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.worker_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(Error::Spawn(format!(
                "Configured worker binary '{}' does not exist",
                path.display()
            )));
        }

        let worker_name = if cfg!(windows) {
            "outpost-worker.exe"
        } else {
            WORKER_BINARY
        };

        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let candidate = exe_dir.join(worker_name);
                if candidate.exists() {
                    return Ok(candidate);
                }
                // Test binaries live one level down, in target/<profile>/deps.
                if let Some(profile_dir) = exe_dir.parent() {
                    let candidate = profile_dir.join(worker_name);
                    if candidate.exists() {
                        return Ok(candidate);
                    }
                }
            }
        }

        if let Ok(path) = which::which(worker_name) {
            return Ok(path);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            for profile in &["debug", "release"] {
                let path = PathBuf::from(&manifest_dir)
                    .join("..")
                    .join("..")
                    .join("target")
                    .join(profile)
                    .join(worker_name);
                if path.exists() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::Spawn(format!(
            "Could not find {} binary. Set {} or ensure it's in PATH.",
            WORKER_BINARY, WORKER_PATH_ENV
        )))
    }
}

fn parse_max_frame_len(raw: &str) -> Result<usize> {
    raw.trim().parse().map_err(|e| {
        Error::Config(format!(
            "{} must be a byte count, got '{}': {}",
            MAX_FRAME_ENV, raw, e
        ))
    })
}
