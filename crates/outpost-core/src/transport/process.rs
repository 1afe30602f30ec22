//! Workers in child processes.
//!
//! The child is the worker executable started with `--entry <name>`. Messages
//! travel as length-prefixed JSON frames over its stdin/stdout; stderr is
//! inherited so worker logs reach the host's terminal.

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ProcessConfig;
use crate::error::{Error, Result};
use crate::frame;

use super::{Link, Transport, WorkerResource};

/// Spawns process workers.
pub struct ProcessTransport {
    config: ProcessConfig,
}

impl ProcessTransport {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self::new(ProcessConfig::default())
    }
}

impl Transport for ProcessTransport {
    fn open<'a>(&'a self, entry: &'a str) -> BoxFuture<'a, Result<Link>> {
        async move { self.spawn(entry) }.boxed()
    }
}

impl ProcessTransport {
    fn spawn(&self, entry: &str) -> Result<Link> {
        let worker_path = self.config.resolve_worker_path()?;

        let mut child = Command::new(&worker_path)
            .arg("--entry")
            .arg(entry)
            .arg("--max-frame-len")
            .arg(self.config.max_frame_len.to_string())
            .args(&self.config.args)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Spawn(format!(
                    "Failed to spawn worker process '{}': {}",
                    worker_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdout".to_string()))?;
        let pid = child.id();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let max_frame_len = self.config.max_frame_len;

        let reader = tokio::spawn(async move {
            if let Err(e) = frame::pump_inbound(stdout, inbound_tx, max_frame_len).await {
                tracing::warn!("Worker stdout closed with error: {}", e);
            }
        });
        let writer = tokio::spawn(async move {
            if let Err(e) = frame::pump_outbound(stdin, outbound_rx).await {
                tracing::debug!("Worker stdin closed with error: {}", e);
            }
        });

        tracing::debug!(
            "Spawned worker process {:?} for entry '{}' from '{}'",
            pid,
            entry,
            worker_path.display()
        );

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
            resource: Box::new(ProcessWorker {
                pid,
                child: Mutex::new(child),
                io: vec![reader, writer],
            }),
        })
    }
}

/// Handle to a worker process.
struct ProcessWorker {
    pid: Option<u32>,
    child: Mutex<Child>,
    io: Vec<JoinHandle<()>>,
}

impl WorkerResource for ProcessWorker {
    fn terminate(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);

        // Already reaped: nothing to kill.
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        // SIGKILL for immediate termination; the reader sees EOF once it lands.
        if let Err(e) = child.start_kill() {
            tracing::warn!("Failed to kill worker {:?}: {}", self.pid, e);
        }
    }

    fn is_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(child.try_wait(), Ok(None))
    }

    fn describe(&self) -> String {
        match self.pid {
            Some(pid) => format!("process {}", pid),
            None => "process (exited)".to_string(),
        }
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        // Ensure worker is killed when handle is dropped
        self.terminate();
        for task in &self.io {
            task.abort();
        }
    }
}
