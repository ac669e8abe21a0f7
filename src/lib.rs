//! # ferrogroup
//!
//! Bootstrap for a process group: start N cooperating processes and let each
//! one find out who it is.
//!
//! This crate provides:
//! - A scoped membership handle ([`Group`]) that joins on construction and
//!   leaves on every exit path
//! - A [`Runtime`] trait at the seam to whatever forms the group, with a TCP
//!   rendezvous implementation and a singleton fallback
//! - The rendezvous [`Coordinator`] and a [`launch`] function that starts
//!   the members (used by the `ferrogroup-run` binary)
//! - The identity reporter behind the `hello-group` binary
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrogroup::{runtime, Group};
//!
//! fn main() -> Result<(), ferrogroup::Error> {
//!     let group = Group::join(runtime::from_env()?)?;
//!     let world = group.world();
//!
//!     println!(
//!         "Hello from rank {} out of {} processors on {}",
//!         world.rank(),
//!         world.size(),
//!         world.processor_name()
//!     );
//!
//!     // The group is left when `group` goes out of scope
//!     Ok(())
//! }
//! ```
//!
//! Run it as a group of four with:
//!
//! ```text
//! ferrogroup-run -n 4 -- ./target/debug/my-program
//! ```
//!
//! ## Lifecycle
//!
//! Each member goes through `Unjoined -> Joined -> Left` exactly once.
//! The states are types: an unjoined member is a bare [`Runtime`], a joined
//! member is a [`Group`], and leaving consumes the [`Group`]. A
//! [`Communicator`] borrows its group, so it cannot be used after leaving.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]

mod comm;
pub mod coordinator;
pub mod env;
mod error;
pub mod hostname;
pub mod launcher;
pub mod logging;
pub mod reporter;
pub mod runtime;
pub mod wire;

pub use comm::Communicator;
pub use coordinator::{Coordinator, Membership};
pub use error::{Error, Result};
pub use launcher::{launch, LaunchConfig};
pub use reporter::{report, Identity};
pub use runtime::{Runtime, SingletonRuntime, TcpRuntime};

/// Membership in a process group.
///
/// This type represents a joined member. When dropped, it leaves the group;
/// a failure to leave at that point is logged and otherwise ignored. Call
/// [`leave()`](Self::leave) instead to observe the error.
///
/// # Example
///
/// ```no_run
/// use ferrogroup::{Group, SingletonRuntime};
///
/// let group = Group::join(SingletonRuntime).expect("failed to join group");
/// let world = group.world();
/// println!("Running on {} processes", world.size());
/// // The group is left when `group` goes out of scope
/// ```
pub struct Group<R: Runtime> {
    runtime: R,
    joined: bool,
}

impl<R: Runtime> Group<R> {
    /// Join the group through `runtime`.
    ///
    /// The runtime is consumed, so a runtime instance joins at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the group cannot be formed, or if the runtime
    /// reports a rank or size that cannot describe a group. In the latter
    /// case the group is left before returning.
    pub fn join(mut runtime: R) -> Result<Self> {
        runtime.join()?;
        let group = Group {
            runtime,
            joined: true,
        };

        let (rank, size) = (group.runtime.rank(), group.runtime.size());
        if size < 1 {
            return Err(Error::InvalidSize(size));
        }
        if rank < 0 || rank >= size {
            return Err(Error::InvalidRank(rank));
        }
        tracing::debug!(rank, size, "group joined");
        Ok(group)
    }

    /// Get a view of the whole group.
    pub fn world(&self) -> Communicator<'_> {
        Communicator::new(&self.runtime)
    }

    /// Leave the group, reporting any teardown failure.
    ///
    /// The group is considered left even if this returns an error.
    pub fn leave(mut self) -> Result<()> {
        self.leave_inner()
    }

    fn leave_inner(&mut self) -> Result<()> {
        if !self.joined {
            return Ok(());
        }
        self.joined = false;
        self.runtime.leave()
    }
}

impl<R: Runtime> Drop for Group<R> {
    fn drop(&mut self) {
        if let Err(err) = self.leave_inner() {
            tracing::warn!(error = %err, "failed to leave process group");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeRuntime};

    #[test]
    fn drop_leaves_exactly_once() {
        let rt = FakeRuntime::new(1, 4, "node01");
        {
            let group = Group::join(rt.clone()).unwrap();
            assert_eq!(group.world().rank(), 1);
            assert_eq!(group.world().size(), 4);
        }
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);
    }

    #[test]
    fn explicit_leave_is_not_repeated_by_drop() {
        let rt = FakeRuntime::new(0, 1, "node01");
        let group = Group::join(rt.clone()).unwrap();
        group.leave().unwrap();
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);
    }

    #[test]
    fn failed_join_never_leaves() {
        let mut rt = FakeRuntime::new(0, 2, "node01");
        rt.fail_join = true;
        assert!(matches!(
            Group::join(rt.clone()),
            Err(Error::JoinRejected(_))
        ));
        assert_eq!(rt.calls(), vec![Call::Join]);
    }

    #[test]
    fn failed_leave_is_reported_by_explicit_leave() {
        let mut rt = FakeRuntime::new(0, 2, "node01");
        rt.fail_leave = true;
        let group = Group::join(rt.clone()).unwrap();
        assert!(matches!(group.leave(), Err(Error::Disconnected)));
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);
    }

    #[test]
    fn failed_leave_in_drop_does_not_panic() {
        let mut rt = FakeRuntime::new(0, 2, "node01");
        rt.fail_leave = true;
        drop(Group::join(rt.clone()).unwrap());
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);
    }

    #[test]
    fn nonsense_identity_is_rejected_after_leaving() {
        let rt = FakeRuntime::new(5, 3, "node01");
        assert!(matches!(Group::join(rt.clone()), Err(Error::InvalidRank(5))));
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);

        let rt = FakeRuntime::new(0, 0, "node01");
        assert!(matches!(Group::join(rt.clone()), Err(Error::InvalidSize(0))));
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);
    }

    #[test]
    fn leave_runs_when_unwinding() {
        let rt = FakeRuntime::new(0, 1, "node01");
        let inner = rt.clone();
        let result = std::panic::catch_unwind(move || {
            let _group = Group::join(inner).unwrap();
            panic!("member failed mid-run");
        });
        assert!(result.is_err());
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);
    }

    #[test]
    fn boxed_runtime_is_a_runtime() {
        let rt = FakeRuntime::new(2, 3, "node01");
        let boxed: Box<dyn Runtime> = Box::new(rt.clone());
        let group = Group::join(boxed).unwrap();
        assert_eq!(group.world().rank(), 2);
        drop(group);
        assert_eq!(rt.calls(), vec![Call::Join, Call::Leave]);
    }
}
