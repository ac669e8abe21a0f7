//! Starting a process group.
//!
//! [`launch`] does what `mpiexec` does for an MPI job, minus everything but
//! the bootstrap: it hosts a [`Coordinator`], starts `size` copies of a
//! program with their identity in the environment, and folds the members'
//! exit statuses into one exit code.

use crate::coordinator::Coordinator;
use crate::env::{COORDINATOR_VAR, HOSTNAME_VAR, JOIN_TIMEOUT_VAR, LOG_VAR, RANK_VAR, SIZE_VAR};
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::io;
use std::net::SocketAddr;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::Duration;

/// How to start a group.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Number of members.
    pub size: i32,
    /// Program every member runs.
    pub program: OsString,
    /// Arguments passed to every member.
    pub args: Vec<OsString>,
    /// Address the coordinator listens on.
    pub bind: SocketAddr,
    /// How long members get to join before the group is abandoned.
    pub join_timeout: Duration,
    /// Host label every member reports instead of the OS host name.
    pub host_name: Option<String>,
    /// Log level forwarded to the members.
    pub log_level: Option<String>,
}

impl LaunchConfig {
    /// A group of `size` copies of `program`, with default settings.
    pub fn new(size: i32, program: impl Into<OsString>) -> Self {
        LaunchConfig {
            size,
            program: program.into(),
            args: Vec::new(),
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            join_timeout: crate::env::DEFAULT_JOIN_TIMEOUT,
            host_name: None,
            log_level: None,
        }
    }

    fn command(&self, rank: i32, coordinator: SocketAddr) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(RANK_VAR, rank.to_string())
            .env(SIZE_VAR, self.size.to_string())
            .env(COORDINATOR_VAR, coordinator.to_string())
            .env(JOIN_TIMEOUT_VAR, self.join_timeout.as_millis().to_string());
        if let Some(host) = &self.host_name {
            cmd.env(HOSTNAME_VAR, host);
        }
        if let Some(level) = &self.log_level {
            cmd.env(LOG_VAR, level);
        }
        cmd
    }
}

/// Start the group described by `config` and wait for it to finish.
///
/// Returns the group exit code: `0` if every member exited successfully,
/// otherwise the first non-zero member exit code in rank order.
///
/// # Errors
///
/// Returns an error if the size is invalid, the coordinator cannot bind, or
/// a member cannot be started. In the last case the members already started
/// are killed.
pub fn launch(config: &LaunchConfig) -> Result<i32> {
    if config.size < 1 {
        return Err(Error::InvalidSize(config.size));
    }

    let coordinator = Coordinator::bind(config.bind, config.size, config.join_timeout)?;
    let addr = coordinator.local_addr()?;
    tracing::info!(size = coordinator.size(), %addr, "coordinator listening");
    let server = thread::Builder::new()
        .name("ferrogroup-coordinator".into())
        .spawn(move || coordinator.run())?;

    let mut children: Vec<Child> = Vec::with_capacity(config.size as usize);
    for rank in 0..config.size {
        match config.command(rank, addr).spawn() {
            Ok(child) => {
                tracing::debug!(rank, pid = child.id(), "member started");
                children.push(child);
            }
            Err(source) => {
                for mut child in children {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                // The coordinator thread rejects whoever connected and exits
                // on its own once the join timeout passes.
                return Err(Error::Spawn { rank, source });
            }
        }
    }

    let codes: Vec<i32> = children
        .iter_mut()
        .enumerate()
        .map(|(rank, child)| member_exit_code(rank, child.wait()))
        .collect();
    let mut code = group_exit_code(&codes);

    match server.join() {
        Ok(Ok(membership)) => {
            let abnormal = membership.abnormal_departures();
            if abnormal.is_empty() {
                tracing::info!(size = membership.size, "group finished");
            } else {
                tracing::warn!(ranks = ?abnormal, "members exited without leaving");
            }
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, "group formation failed");
            if code == 0 {
                code = 1;
            }
        }
        Err(_) => return Err(Error::Internal("coordinator thread panicked".into())),
    }
    Ok(code)
}

/// Exit code of one member, given the outcome of waiting on it.
///
/// A member killed by a signal, or one that could not be waited on, counts
/// as exit code 1.
fn member_exit_code(rank: usize, waited: io::Result<ExitStatus>) -> i32 {
    match waited {
        Ok(status) if status.success() => 0,
        Ok(status) => {
            tracing::warn!(rank, %status, "member failed");
            status.code().filter(|&c| c != 0).unwrap_or(1)
        }
        Err(err) => {
            tracing::error!(rank, error = %err, "could not wait for member");
            1
        }
    }
}

/// Fold member exit codes (in rank order) into one exit code: the first
/// non-zero code, or `0` if every member succeeded.
pub fn group_exit_code(codes: &[i32]) -> i32 {
    codes.iter().copied().find(|&c| c != 0).unwrap_or(0)
}
