//! The identity reporter: one line per member saying who it is.

use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::Group;
use std::fmt;
use std::io::{self, Write};

/// Who a member is: its rank, the group size, and where it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Rank within the group.
    pub rank: i32,
    /// Number of members in the group.
    pub size: i32,
    /// Host the member runs on.
    pub host: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hello from rank {} out of {} processors on {}",
            self.rank, self.size, self.host
        )
    }
}

/// Write the identity line, newline-terminated, and flush.
pub fn emit_identity<W: Write>(identity: &Identity, out: &mut W) -> io::Result<()> {
    writeln!(out, "{identity}")?;
    out.flush()
}

/// Join the group, report this member's identity to `out`, and leave.
///
/// Nothing is written if joining fails. Once joined, the group is left on
/// every path; a failure to leave after the line was written is logged and
/// does not turn the report into an error.
pub fn report<R, W>(runtime: R, out: &mut W) -> Result<Identity>
where
    R: Runtime,
    W: Write,
{
    let group = Group::join(runtime)?;

    let world = group.world();
    let identity = Identity {
        rank: world.rank(),
        size: world.size(),
        host: world.processor_name(),
    };
    emit_identity(&identity, out).map_err(Error::Output)?;

    if let Err(err) = group.leave() {
        tracing::warn!(rank = identity.rank, error = %err, "teardown failed after report");
    }
    Ok(identity)
}
