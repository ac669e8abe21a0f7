//! Rendezvous protocol between group members and the coordinator.
//!
//! Frames are single-line JSON objects terminated by `\n`. A member speaks
//! exactly two frames over its lifetime (`Join`, then `Leave`) and hears
//! exactly two back (`Welcome` or `Reject`, then `Release`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

/// Longest frame, newline included, a reader accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Frames sent from a member to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemberFrame {
    /// Request admission to the group.
    Join {
        /// Rank the launcher assigned to this member
        rank: i32,
        /// Group size the member was launched with
        size: i32,
        /// Host the member runs on
        host: String,
        /// OS process id of the member
        pid: u32,
    },
    /// Announce that the member is done with the group.
    Leave {
        /// Rank of the departing member
        rank: i32,
    },
}

/// Frames sent from the coordinator to a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorFrame {
    /// Every member joined; the group is formed.
    Welcome {
        /// Confirmed group size
        size: i32,
    },
    /// The group cannot be formed.
    Reject {
        /// Human-readable cause
        reason: String,
    },
    /// Every member left; the member may exit.
    Release,
}

/// Serialize `frame` as one line and flush it.
pub fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame.
///
/// Returns [`Error::Disconnected`] if the stream ends before a full line and
/// [`Error::Protocol`] if the line is longer than [`MAX_FRAME_LEN`].
pub fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: BufRead,
    T: for<'de> Deserialize<'de>,
{
    let mut line = Vec::new();
    Read::take(&mut *reader, MAX_FRAME_LEN as u64 + 1).read_until(b'\n', &mut line)?;
    decode_line(&line)
}

/// Read one frame from a socket, giving up once `deadline` has passed.
///
/// The socket read timeout is re-armed with the time left before every read,
/// so a peer trickling bytes cannot stretch the wait past the deadline.
pub(crate) fn read_frame_before<T>(
    reader: &mut BufReader<TcpStream>,
    deadline: Instant,
    what: &str,
) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let mut line = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout(what.to_string()));
        }
        reader.get_ref().set_read_timeout(Some(remaining))?;

        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::from_io_deadline(err, what)),
        };
        if available.is_empty() {
            return Err(Error::Disconnected);
        }
        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        if line.len() + used > MAX_FRAME_LEN {
            return Err(oversized());
        }
        line.extend_from_slice(&available[..used]);
        reader.consume(used);

        if complete {
            return decode_line(&line);
        }
    }
}

fn decode_line<T>(line: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if line.len() > MAX_FRAME_LEN {
        return Err(oversized());
    }
    match line.strip_suffix(b"\n") {
        Some(body) => Ok(serde_json::from_slice(body)?),
        None => Err(Error::Disconnected),
    }
}

fn oversized() -> Error {
    Error::Protocol(format!("frame exceeds {MAX_FRAME_LEN} bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn join_frame_layout() {
        let frame = MemberFrame::Join {
            rank: 1,
            size: 3,
            host: "node01".into(),
            pid: 4242,
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "{\"type\":\"join\",\"rank\":1,\"size\":3,\"host\":\"node01\",\"pid\":4242}\n"
        );
    }

    #[test]
    fn release_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &CoordinatorFrame::Release).unwrap();
        assert_eq!(buf, b"{\"type\":\"release\"}\n");
    }

    #[test]
    fn frames_are_read_in_sequence() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &CoordinatorFrame::Welcome { size: 2 }).unwrap();
        write_frame(&mut buf, &CoordinatorFrame::Release).unwrap();

        let mut reader = Cursor::new(buf);
        let first: CoordinatorFrame = read_frame(&mut reader).unwrap();
        let second: CoordinatorFrame = read_frame(&mut reader).unwrap();
        assert_eq!(first, CoordinatorFrame::Welcome { size: 2 });
        assert_eq!(second, CoordinatorFrame::Release);

        let third: Result<CoordinatorFrame> = read_frame(&mut reader);
        assert!(matches!(third, Err(Error::Disconnected)));
    }

    #[test]
    fn partial_line_is_a_disconnect() {
        let mut reader = Cursor::new(b"{\"type\":\"lea".to_vec());
        let frame: Result<MemberFrame> = read_frame(&mut reader);
        assert!(matches!(frame, Err(Error::Disconnected)));
    }

    #[test]
    fn oversized_line_is_refused() {
        let mut data = vec![b' '; MAX_FRAME_LEN];
        data.extend_from_slice(b"{\"type\":\"release\"}\n");
        let mut reader = Cursor::new(data);
        let frame: Result<CoordinatorFrame> = read_frame(&mut reader);
        assert!(matches!(frame, Err(Error::Protocol(ref m)) if m.contains("exceeds")));
    }

    #[test]
    fn frame_at_the_limit_is_accepted() {
        let body = b"{\"type\":\"release\"}";
        let mut data = vec![b' '; MAX_FRAME_LEN - body.len() - 1];
        data.extend_from_slice(body);
        data.push(b'\n');
        assert_eq!(data.len(), MAX_FRAME_LEN);
        let frame: CoordinatorFrame = read_frame(&mut Cursor::new(data)).unwrap();
        assert_eq!(frame, CoordinatorFrame::Release);
    }

    #[test]
    fn unknown_frame_is_malformed() {
        let mut reader = Cursor::new(b"{\"type\":\"gossip\"}\n".to_vec());
        let frame: Result<MemberFrame> = read_frame(&mut reader);
        assert!(matches!(frame, Err(Error::Json(_))));
    }
}
