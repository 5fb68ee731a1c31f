pub mod classifier;
pub mod command;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::status_dispatch::StatusSender;
use classifier::ConnectionMonitor;
use command::TranscoderCommand;

const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One supervised transcoder per active stream.
pub struct IngestSupervisor {
    command: Arc<dyn TranscoderCommand>,
    restart_delay: Duration,
    status: StatusSender,
    processes: Mutex<HashMap<String, IngestProcess>>,
}

struct IngestProcess {
    cancel: CancellationToken,
    monitor: Arc<ConnectionMonitor>,
    pid: Arc<AtomicU32>,
    run_loop: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSnapshot {
    /// `None` while the run loop is between restarts.
    pub pid: Option<u32>,
    pub connected: bool,
}

struct RunLoop {
    stream_id: String,
    listen_address: String,
    segment_dir: PathBuf,
    command: Arc<dyn TranscoderCommand>,
    restart_delay: Duration,
    status: StatusSender,
    cancel: CancellationToken,
    monitor: Arc<ConnectionMonitor>,
    pid: Arc<AtomicU32>,
}

impl IngestSupervisor {
    pub fn new(
        command: Arc<dyn TranscoderCommand>,
        restart_delay: Duration,
        status: StatusSender,
    ) -> Self {
        Self {
            command,
            restart_delay,
            status,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// No-op when the stream already has a run loop.
    pub async fn start(
        &self,
        stream_id: &str,
        listen_address: &str,
        segment_dir: &Path,
    ) -> Result<()> {
        if self.is_running(stream_id) {
            debug!(stream_id = %stream_id, "supervisor: already running");
            return Ok(());
        }

        tokio::fs::create_dir_all(segment_dir)
            .await
            .with_context(|| format!("failed to create segment dir {}", segment_dir.display()))?;

        let mut processes = self.lock_processes();
        if processes.contains_key(stream_id) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let monitor = Arc::new(ConnectionMonitor::default());
        let pid = Arc::new(AtomicU32::new(0));

        let run_loop = tokio::spawn(
            RunLoop {
                stream_id: stream_id.to_string(),
                listen_address: listen_address.to_string(),
                segment_dir: segment_dir.to_path_buf(),
                command: Arc::clone(&self.command),
                restart_delay: self.restart_delay,
                status: self.status.clone(),
                cancel: cancel.clone(),
                monitor: Arc::clone(&monitor),
                pid: Arc::clone(&pid),
            }
            .run(),
        );

        processes.insert(
            stream_id.to_string(),
            IngestProcess {
                cancel,
                monitor,
                pid,
                run_loop,
            },
        );
        info!(stream_id = %stream_id, listen_address = %listen_address, "supervisor: started");
        Ok(())
    }

    /// Cancels the run loop, kills the subprocess and waits for both to end.
    /// Returns `false` when the stream was not supervised.
    pub async fn stop(&self, stream_id: &str) -> bool {
        let Some(process) = self.lock_processes().remove(stream_id) else {
            debug!(stream_id = %stream_id, "supervisor: stop for unknown stream ignored");
            return false;
        };

        process.cancel.cancel();
        if let Err(err) = process.run_loop.await {
            error!(stream_id = %stream_id, error = %err, "supervisor: run loop panicked");
        }
        info!(stream_id = %stream_id, "supervisor: stopped");
        true
    }

    pub async fn stop_all(&self) {
        let stream_ids: Vec<String> = self.lock_processes().keys().cloned().collect();
        for stream_id in stream_ids {
            self.stop(&stream_id).await;
        }
    }

    pub fn is_running(&self, stream_id: &str) -> bool {
        self.lock_processes().contains_key(stream_id)
    }

    pub fn snapshot(&self, stream_id: &str) -> Option<ProcessSnapshot> {
        self.lock_processes().get(stream_id).map(|process| {
            let pid = process.pid.load(Ordering::Acquire);
            ProcessSnapshot {
                pid: (pid != 0).then_some(pid),
                connected: process.monitor.is_connected(),
            }
        })
    }

    fn lock_processes(&self) -> std::sync::MutexGuard<'_, HashMap<String, IngestProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunLoop {
    async fn run(self) {
        let mut restarts: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut command = self
                .command
                .build(&self.stream_id, &self.listen_address, &self.segment_dir);
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            match command.spawn() {
                Ok(mut child) => {
                    self.pid.store(child.id().unwrap_or(0), Ordering::Release);
                    info!(
                        stream_id = %self.stream_id,
                        pid = child.id().unwrap_or(0),
                        restarts,
                        "supervisor: transcoder spawned"
                    );

                    let reader = child.stderr.take().map(|stderr| {
                        tokio::spawn(scan_diagnostics(
                            stderr,
                            self.stream_id.clone(),
                            Arc::clone(&self.monitor),
                            self.status.clone(),
                        ))
                    });

                    let cancelled = tokio::select! {
                        status = child.wait() => {
                            match status {
                                Ok(status) => warn!(
                                    stream_id = %self.stream_id,
                                    status = %status,
                                    "supervisor: transcoder exited"
                                ),
                                Err(err) => error!(
                                    stream_id = %self.stream_id,
                                    error = %err,
                                    "supervisor: failed to wait for transcoder"
                                ),
                            }
                            false
                        }
                        _ = self.cancel.cancelled() => {
                            if let Err(err) = child.kill().await {
                                warn!(
                                    stream_id = %self.stream_id,
                                    error = %err,
                                    "supervisor: failed to kill transcoder"
                                );
                            }
                            true
                        }
                    };

                    self.pid.store(0, Ordering::Release);
                    if let Some(reader) = reader {
                        drain_reader(reader).await;
                    }
                    // A deliberate stop is reported by whoever stopped the stream.
                    if let Some(status) = self.monitor.mark_disconnected() {
                        if !cancelled {
                            self.status.notify(&self.stream_id, status);
                        }
                    }
                    if cancelled {
                        break;
                    }
                }
                Err(err) => {
                    error!(
                        stream_id = %self.stream_id,
                        error = %err,
                        "supervisor: failed to spawn transcoder"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.restart_delay) => {}
            }
            restarts += 1;
            info!(stream_id = %self.stream_id, restarts, "supervisor: restarting transcoder");
        }

        debug!(stream_id = %self.stream_id, "supervisor: run loop exited");
    }
}

async fn drain_reader(mut reader: JoinHandle<()>) {
    if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
        .await
        .is_err()
    {
        reader.abort();
    }
}

async fn scan_diagnostics(
    stderr: ChildStderr,
    stream_id: String,
    monitor: Arc<ConnectionMonitor>,
    status: StatusSender,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(stream_id = %stream_id, line = %line, "transcoder");
                if let Some(change) = monitor.observe(&line) {
                    info!(stream_id = %stream_id, status = %change, "supervisor: connection state changed");
                    status.notify(&stream_id, change);
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(stream_id = %stream_id, error = %err, "supervisor: failed to read transcoder output");
                break;
            }
        }
    }
}
