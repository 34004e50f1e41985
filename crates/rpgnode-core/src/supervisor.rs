//! Child daemon process supervision.
//!
//! The supervisor owns at most one running daemon. It clears a stale
//! process left behind in the pid file, launches the daemon with inherited
//! stdio, publishes exit status on a watch channel and performs the
//! interrupt-and-wait shutdown.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::daemon_conf::SpawnPlan;
use crate::error::CoreError;

/// Lifecycle of the supervised daemon:
/// `Idle -> Spawning -> Running -> Exited -> Respawning | Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Spawning,
    Running { pid: u32 },
    /// `code` is `None` when the process was killed by a signal.
    Exited { code: Option<i32> },
    Respawning,
    Stopped,
}

pub struct ProcessSupervisor {
    exec: PathBuf,
    args: Vec<String>,
    pid_file: PathBuf,
    stop_wait: Duration,
    state: Arc<watch::Sender<ProcessState>>,
}

impl ProcessSupervisor {
    pub fn new(exec: PathBuf, args: Vec<String>, pid_file: PathBuf, stop_wait: Duration) -> Self {
        let (state, _) = watch::channel(ProcessState::Idle);
        Self {
            exec,
            args,
            pid_file,
            stop_wait,
            state: Arc::new(state),
        }
    }

    pub fn from_plan(plan: &SpawnPlan, stop_wait: Duration) -> Self {
        Self::new(
            plan.exec.clone(),
            plan.daemon_args(),
            plan.pid_file.clone(),
            stop_wait,
        )
    }

    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    pub fn mark_respawning(&self) {
        self.state.send_replace(ProcessState::Respawning);
    }

    pub fn mark_stopped(&self) {
        self.state.send_replace(ProcessState::Stopped);
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Interrupt a daemon still recorded in the pid file and wait for it to
    /// remove the file.
    pub async fn stop_stale_process(&self) -> Result<(), CoreError> {
        loop {
            let contents = match tokio::fs::read_to_string(&self.pid_file).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(CoreError::Io(e)),
            };
            let Ok(pid) = contents.trim().parse::<u32>() else {
                return Ok(());
            };

            warn!(
                pid,
                pid_file = %self.pid_file.display(),
                "unclean shutdown detected, stopping previous daemon"
            );
            match send_interrupt(pid) {
                Ok(()) => tokio::time::sleep(self.stop_wait).await,
                Err(e) if is_no_such_process(&e) => {
                    warn!(pid, "previous daemon is already gone");
                    return Ok(());
                }
                Err(e) => {
                    warn!(pid, error = %e, "failed to signal previous daemon");
                    return Ok(());
                }
            }
        }
    }

    /// Start the daemon. A background task publishes its exit status.
    pub fn launch(&self) -> Result<u32, CoreError> {
        info!(exec = %self.exec.display(), args = ?self.args, "spawning daemon");
        self.state.send_replace(ProcessState::Spawning);
        let mut child = Command::new(&self.exec)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                self.state.send_replace(ProcessState::Exited { code: None });
                CoreError::Process(format!("failed to spawn {}: {e}", self.exec.display()))
            })?;
        let pid = child
            .id()
            .ok_or_else(|| CoreError::Process("daemon exited before reporting a pid".to_owned()))?;
        self.state.send_replace(ProcessState::Running { pid });

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait for daemon");
                    None
                }
            };
            info!(pid, code = ?code, "daemon exited");
            state.send_replace(ProcessState::Exited { code });
        });

        Ok(pid)
    }

    /// Send SIGINT to the running daemon and wait up to `timeout` for it to
    /// exit. Returns immediately when no daemon is running.
    pub async fn interrupt_and_wait(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.state.subscribe();
        let pid = match *rx.borrow_and_update() {
            ProcessState::Running { pid } => pid,
            _ => return Ok(()),
        };

        info!(pid, "stopping daemon");
        if let Err(e) = send_interrupt(pid) {
            if !is_no_such_process(&e) {
                return Err(CoreError::Io(e));
            }
        }

        let exited = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| matches!(state, ProcessState::Exited { .. })),
        )
        .await
        .map_err(|_| CoreError::ShutdownTimeout(timeout))?
        .map(|state| state.clone())
        .map_err(|_| CoreError::Process("daemon status channel closed".to_owned()))?;

        match exited {
            ProcessState::Exited { code: Some(0) } => Ok(()),
            ProcessState::Exited { code: Some(code) } => Err(CoreError::ProcessExit { code }),
            _ => Err(CoreError::Process("daemon terminated by signal".to_owned())),
        }
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let result = unsafe { libc::kill(pid, libc::SIGINT) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interrupting a process needs unix signals",
    ))
}

#[cfg(unix)]
fn is_no_such_process(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn is_no_such_process(_e: &io::Error) -> bool {
    false
}
