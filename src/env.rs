//! Launch environment helpers.
//!
//! `ferrogroup-run` tells each member who it is through environment
//! variables. [`MemberConfig::from_env`] reads them back; [`is_launched`]
//! reports whether they are there at all (they are not when the program was
//! started by hand).
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `FERROGROUP_RANK` | Rank assigned by the launcher |
//! | `FERROGROUP_SIZE` | Number of members in the group |
//! | `FERROGROUP_COORDINATOR` | `host:port` of the rendezvous coordinator |
//! | `FERROGROUP_JOIN_TIMEOUT_MS` | How long a member waits for group formation |
//! | `FERROGROUP_HOSTNAME` | Host label to report instead of the OS host name |
//! | `FERROGROUP_LOG` | Log level for the binaries |

use crate::error::{Error, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Rank assigned to this member.
pub const RANK_VAR: &str = "FERROGROUP_RANK";
/// Size of the group.
pub const SIZE_VAR: &str = "FERROGROUP_SIZE";
/// Address of the rendezvous coordinator.
pub const COORDINATOR_VAR: &str = "FERROGROUP_COORDINATOR";
/// Join timeout in milliseconds.
pub const JOIN_TIMEOUT_VAR: &str = "FERROGROUP_JOIN_TIMEOUT_MS";
/// Host label override.
pub const HOSTNAME_VAR: &str = "FERROGROUP_HOSTNAME";
/// Log level for the binaries.
pub const LOG_VAR: &str = "FERROGROUP_LOG";

/// Default time a member waits for every other member to join.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Check if this process was started by `ferrogroup-run`.
pub fn is_launched() -> bool {
    env::var_os(RANK_VAR).is_some()
        || env::var_os(SIZE_VAR).is_some()
        || env::var_os(COORDINATOR_VAR).is_some()
}

/// Get the host label override, if any.
pub fn host_name_override() -> Option<String> {
    env::var(HOSTNAME_VAR).ok().filter(|s| !s.is_empty())
}

/// Everything a launched member needs to join its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberConfig {
    /// This member's rank.
    pub rank: i32,
    /// Expected group size.
    pub size: i32,
    /// Rendezvous coordinator.
    pub coordinator: SocketAddr,
    /// How long to wait for the group to form.
    pub join_timeout: Duration,
}

impl MemberConfig {
    /// Build a member configuration, validating rank and size.
    pub fn new(rank: i32, size: i32, coordinator: SocketAddr) -> Result<Self> {
        if size < 1 {
            return Err(Error::InvalidSize(size));
        }
        if rank < 0 || rank >= size {
            return Err(Error::InvalidRank(rank));
        }
        Ok(MemberConfig {
            rank,
            size,
            coordinator,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        })
    }

    /// Override the join timeout.
    #[must_use]
    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    /// Read the member configuration from the process environment.
    ///
    /// All three launcher variables must be present and parse; a partial
    /// environment is a launch misconfiguration.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let rank = parse_var(&lookup, RANK_VAR)?;
        let size = parse_var(&lookup, SIZE_VAR)?;
        let coordinator = parse_var(&lookup, COORDINATOR_VAR)?;
        let join_timeout = match lookup(JOIN_TIMEOUT_VAR) {
            Some(raw) => Duration::from_millis(raw.trim().parse::<u64>().map_err(|e| {
                Error::Environment {
                    var: JOIN_TIMEOUT_VAR,
                    reason: format!("{e}"),
                }
            })?),
            None => DEFAULT_JOIN_TIMEOUT,
        };
        Ok(Self::new(rank, size, coordinator)?.with_join_timeout(join_timeout))
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<T>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(var).ok_or_else(|| Error::Environment {
        var,
        reason: "not set".into(),
    })?;
    raw.trim().parse().map_err(|e: T::Err| Error::Environment {
        var,
        reason: format!("{raw:?}: {e}"),
    })
}
