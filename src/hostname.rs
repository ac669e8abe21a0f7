//! Host name resolution.
//!
//! The host name is only ever used as a human-readable label, so resolution
//! never fails: a name longer than the capacity is cut short, and an OS error
//! degrades to a placeholder.

use crate::env;
use std::os::raw::c_char;

/// Maximum number of bytes reported for a host name.
pub const HOST_NAME_CAPACITY: usize = 256;

/// Label used when the operating system cannot report a host name.
pub const UNKNOWN_HOST: &str = "unknown";

/// Size of the scratch buffer handed to `gethostname(2)`.
///
/// Larger than any `HOST_NAME_MAX` in the wild, so truncation is always
/// decided by [`truncate_host_name`] rather than by the libc.
const QUERY_BUFFER_LEN: usize = 1025;

/// Resolve this machine's host name, capped at [`HOST_NAME_CAPACITY`] bytes.
pub fn resolve_host_name() -> String {
    resolve_host_name_with_capacity(HOST_NAME_CAPACITY)
}

/// Resolve this machine's host name, capped at `capacity` bytes.
///
/// `FERROGROUP_HOSTNAME`, when set, replaces the OS answer.
pub fn resolve_host_name_with_capacity(capacity: usize) -> String {
    let name = env::host_name_override().unwrap_or_else(|| match os_host_name() {
        Ok(name) => name,
        Err(err) => {
            tracing::warn!(error = %err, "gethostname failed, reporting placeholder");
            UNKNOWN_HOST.to_string()
        }
    });
    truncate_host_name(&name, capacity)
}

/// Cut `name` down to at most `capacity` bytes.
///
/// The cut lands on a character boundary, so the result may be a few bytes
/// shorter than `capacity` for non-ASCII names.
pub fn truncate_host_name(name: &str, capacity: usize) -> String {
    if name.len() <= capacity {
        return name.to_string();
    }
    let mut end = capacity;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    tracing::debug!(len = name.len(), capacity, "host name truncated");
    name[..end].to_string()
}

fn os_host_name() -> std::io::Result<String> {
    let mut buf = [0u8; QUERY_BUFFER_LEN];
    // SAFETY: buf is valid for writes of buf.len() bytes and gethostname
    // never writes past the length it is given. The name may lack a null
    // terminator when truncated, so the read below is bounded by buf.len().
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<c_char>(), buf.len()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_verbatim() {
        assert_eq!(truncate_host_name("node01", HOST_NAME_CAPACITY), "node01");
        assert_eq!(truncate_host_name("", 4), "");
    }

    #[test]
    fn name_at_capacity_is_verbatim() {
        let name = "a".repeat(HOST_NAME_CAPACITY);
        assert_eq!(truncate_host_name(&name, HOST_NAME_CAPACITY), name);
    }

    #[test]
    fn long_names_are_truncated_to_capacity() {
        let name = "b".repeat(HOST_NAME_CAPACITY + 40);
        let truncated = truncate_host_name(&name, HOST_NAME_CAPACITY);
        assert_eq!(truncated.len(), HOST_NAME_CAPACITY);
        assert!(name.starts_with(&truncated));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; a cut at 4 would split the second one
        let truncated = truncate_host_name("aéé", 4);
        assert_eq!(truncated, "aé");
        assert_eq!(truncate_host_name("aéé", 5), "aéé");
    }

    #[test]
    fn zero_capacity_yields_empty_label() {
        assert_eq!(truncate_host_name("node01", 0), "");
    }

    #[test]
    fn os_host_name_is_available() {
        let name = os_host_name().expect("gethostname failed");
        assert!(!name.contains('\0'));
        assert!(resolve_host_name().len() <= HOST_NAME_CAPACITY);
    }
}
