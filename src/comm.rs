//! Read-only view of a joined process group.

use crate::hostname::HOST_NAME_CAPACITY;
use crate::runtime::Runtime;

/// A view of the group a member belongs to.
///
/// Borrowed from a [`Group`](crate::Group), so it can only exist while the
/// member is joined.
///
/// # Example
///
/// ```no_run
/// use ferrogroup::{runtime, Group};
///
/// let group = Group::join(runtime::from_env().unwrap()).unwrap();
/// let world = group.world();
///
/// println!("I am rank {} of {}", world.rank(), world.size());
/// ```
#[derive(Clone, Copy)]
pub struct Communicator<'a> {
    runtime: &'a dyn Runtime,
}

impl<'a> Communicator<'a> {
    pub(crate) fn new(runtime: &'a dyn Runtime) -> Self {
        Communicator { runtime }
    }

    /// Get the rank of the calling process in this group.
    pub fn rank(&self) -> i32 {
        self.runtime.rank()
    }

    /// Get the number of processes in this group.
    pub fn size(&self) -> i32 {
        self.runtime.size()
    }

    /// Get the name of the host this process runs on.
    ///
    /// Names longer than [`HOST_NAME_CAPACITY`] bytes are truncated.
    pub fn processor_name(&self) -> String {
        self.processor_name_with_capacity(HOST_NAME_CAPACITY)
    }

    /// Get the host name, truncated to `capacity` bytes.
    pub fn processor_name_with_capacity(&self, capacity: usize) -> String {
        self.runtime.host_name(capacity)
    }
}

impl std::fmt::Debug for Communicator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::FakeRuntime;
    use crate::Group;

    #[test]
    fn reports_runtime_identity() {
        let group = Group::join(FakeRuntime::new(2, 3, "node01")).unwrap();
        let world = group.world();
        assert_eq!(world.rank(), 2);
        assert_eq!(world.size(), 3);
        assert_eq!(world.processor_name(), "node01");
    }

    #[test]
    fn long_host_names_are_capped() {
        let long = "n".repeat(300);
        let group = Group::join(FakeRuntime::new(0, 1, &long)).unwrap();
        let world = group.world();
        assert_eq!(world.processor_name().len(), 256);
        assert_eq!(world.processor_name_with_capacity(6), "nnnnnn");
    }

    #[test]
    fn debug_shows_identity() {
        let group = Group::join(FakeRuntime::new(1, 2, "node01")).unwrap();
        assert_eq!(
            format!("{:?}", group.world()),
            "Communicator { rank: 1, size: 2 }"
        );
    }
}
