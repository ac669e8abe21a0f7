//! Process-group runtimes.
//!
//! [`Runtime`] is the seam between a group member and whatever forms the
//! group. Two implementations ship with the crate:
//!
//! - [`TcpRuntime`]: a member started by `ferrogroup-run`, which rendezvous
//!   with the launcher's coordinator over TCP.
//! - [`SingletonRuntime`]: a process started by hand; it forms a group of one.
//!
//! Tests substitute their own implementation.

use crate::env::{self, MemberConfig};
use crate::error::{Error, Result};
use crate::hostname;
use crate::wire::{self, CoordinatorFrame, MemberFrame};
use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// Operations a process-group runtime provides to its members.
///
/// Callers normally drive a runtime through [`Group`](crate::Group), which
/// guarantees `join` happens once and `leave` happens on every exit path.
pub trait Runtime {
    /// Become a member of the group.
    ///
    /// Blocks until the group is formed. There is no retry: an error means
    /// this member is not part of any group.
    fn join(&mut self) -> Result<()>;

    /// Rank of this member.
    fn rank(&self) -> i32;

    /// Number of members in the group.
    fn size(&self) -> i32;

    /// Name of the host this member runs on, capped at `capacity` bytes.
    fn host_name(&self, capacity: usize) -> String {
        hostname::resolve_host_name_with_capacity(capacity)
    }

    /// Leave the group.
    ///
    /// May block until every other member has left as well.
    fn leave(&mut self) -> Result<()>;
}

impl<R: Runtime + ?Sized> Runtime for Box<R> {
    fn join(&mut self) -> Result<()> {
        (**self).join()
    }

    fn rank(&self) -> i32 {
        (**self).rank()
    }

    fn size(&self) -> i32 {
        (**self).size()
    }

    fn host_name(&self, capacity: usize) -> String {
        (**self).host_name(capacity)
    }

    fn leave(&mut self) -> Result<()> {
        (**self).leave()
    }
}

/// Pick a runtime from the launch environment.
///
/// Without any `FERROGROUP_*` launcher variables the process runs as a
/// singleton group; with a partial or malformed set this is an error.
pub fn from_env() -> Result<Box<dyn Runtime>> {
    if env::is_launched() {
        let config = MemberConfig::from_env()?;
        tracing::debug!(
            rank = config.rank,
            size = config.size,
            coordinator = %config.coordinator,
            "launched member"
        );
        Ok(Box::new(TcpRuntime::new(config)))
    } else {
        tracing::debug!("no launcher environment, running as singleton");
        Ok(Box::new(SingletonRuntime))
    }
}

// ============================================================================
// Singleton
// ============================================================================

/// A group of exactly one member: rank 0 of 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingletonRuntime;

impl Runtime for SingletonRuntime {
    fn join(&mut self) -> Result<()> {
        Ok(())
    }

    fn rank(&self) -> i32 {
        0
    }

    fn size(&self) -> i32 {
        1
    }

    fn leave(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// TCP rendezvous
// ============================================================================

struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// A member of a group formed by a [`Coordinator`](crate::Coordinator).
pub struct TcpRuntime {
    config: MemberConfig,
    conn: Option<Connection>,
}

impl TcpRuntime {
    /// Create an unjoined member.
    pub fn new(config: MemberConfig) -> Self {
        TcpRuntime { config, conn: None }
    }

    fn connect(&self) -> Result<Connection> {
        let stream =
            TcpStream::connect_timeout(&self.config.coordinator, self.config.join_timeout)
                .map_err(|e| Error::from_io_deadline(e, "connecting to coordinator"))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Connection { reader, writer })
    }
}

impl Runtime for TcpRuntime {
    fn join(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Err(Error::Internal("member already joined".into()));
        }

        let mut conn = self.connect()?;
        let join = MemberFrame::Join {
            rank: self.config.rank,
            size: self.config.size,
            host: self.host_name(hostname::HOST_NAME_CAPACITY),
            pid: std::process::id(),
        };
        wire::write_frame(&mut conn.writer, &join)?;

        let deadline = Instant::now() + self.config.join_timeout;
        let reply: CoordinatorFrame =
            wire::read_frame_before(&mut conn.reader, deadline, "waiting for group formation")?;
        set_read_timeout(&conn, None)?;

        match reply {
            CoordinatorFrame::Welcome { size } if size == self.config.size => {
                tracing::debug!(rank = self.config.rank, size, "joined group");
                self.conn = Some(conn);
                Ok(())
            }
            CoordinatorFrame::Welcome { size } => Err(Error::Protocol(format!(
                "coordinator formed a group of {size}, expected {}",
                self.config.size
            ))),
            CoordinatorFrame::Reject { reason } => Err(Error::JoinRejected(reason)),
            CoordinatorFrame::Release => {
                Err(Error::Protocol("release received before join completed".into()))
            }
        }
    }

    fn rank(&self) -> i32 {
        self.config.rank
    }

    fn size(&self) -> i32 {
        self.config.size
    }

    fn leave(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Err(Error::Internal("leave called before join".into()));
        };
        wire::write_frame(
            &mut conn.writer,
            &MemberFrame::Leave {
                rank: self.config.rank,
            },
        )?;

        // Shutdown barrier: released once every member has left.
        match read_with_deadline::<_, CoordinatorFrame>(&mut conn.reader, "waiting for release")? {
            CoordinatorFrame::Release => {
                tracing::debug!(rank = self.config.rank, "left group");
                Ok(())
            }
            other => Err(Error::Protocol(format!("expected release, got {other:?}"))),
        }
    }
}

fn set_read_timeout(conn: &Connection, timeout: Option<Duration>) -> Result<()> {
    conn.reader.get_ref().set_read_timeout(timeout)?;
    Ok(())
}

/// Read a frame, turning socket deadline errors into [`Error::Timeout`].
pub(crate) fn read_with_deadline<R, T>(reader: &mut R, what: &str) -> Result<T>
where
    R: std::io::BufRead,
    T: for<'de> serde::Deserialize<'de>,
{
    wire::read_frame(reader).map_err(|err| match err {
        Error::Io(io) => Error::from_io_deadline(io, what),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};
    use std::net::TcpListener;
    use std::thread;

    fn member(listener: &TcpListener, rank: i32, size: i32) -> TcpRuntime {
        let addr = listener.local_addr().unwrap();
        let config = MemberConfig::new(rank, size, addr)
            .unwrap()
            .with_join_timeout(Duration::from_secs(5));
        TcpRuntime::new(config)
    }

    /// Accepts one connection and answers each line with the next scripted reply.
    fn scripted_peer(
        listener: TcpListener,
        replies: Vec<&'static str>,
    ) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut seen = Vec::new();
            for reply in replies {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                seen.push(line.trim_end().to_string());
                writer.write_all(reply.as_bytes()).unwrap();
            }
            seen
        })
    }

    #[test]
    fn singleton_is_rank_zero_of_one() {
        let mut rt = SingletonRuntime;
        rt.join().unwrap();
        assert_eq!(rt.rank(), 0);
        assert_eq!(rt.size(), 1);
        rt.leave().unwrap();
    }

    #[test]
    fn join_and_leave_round() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut rt = member(&listener, 1, 2);
        let peer = scripted_peer(
            listener,
            vec!["{\"type\":\"welcome\",\"size\":2}\n", "{\"type\":\"release\"}\n"],
        );

        rt.join().unwrap();
        assert_eq!(rt.rank(), 1);
        assert_eq!(rt.size(), 2);
        rt.leave().unwrap();

        let seen = peer.join().unwrap();
        assert!(seen[0].starts_with("{\"type\":\"join\",\"rank\":1,\"size\":2,"));
        assert_eq!(seen[1], "{\"type\":\"leave\",\"rank\":1}");
    }

    #[test]
    fn rejected_join_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut rt = member(&listener, 0, 3);
        let peer = scripted_peer(
            listener,
            vec!["{\"type\":\"reject\",\"reason\":\"size mismatch\"}\n"],
        );

        let err = rt.join().unwrap_err();
        assert!(matches!(err, Error::JoinRejected(ref r) if r == "size mismatch"));
        peer.join().unwrap();

        // Never joined, so there is nothing to leave
        assert!(rt.leave().is_err());
    }

    #[test]
    fn welcome_with_wrong_size_is_a_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut rt = member(&listener, 0, 3);
        let peer = scripted_peer(listener, vec!["{\"type\":\"welcome\",\"size\":4}\n"]);

        assert!(matches!(rt.join(), Err(Error::Protocol(_))));
        peer.join().unwrap();
    }

    #[test]
    fn silent_coordinator_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = MemberConfig::new(0, 2, addr)
            .unwrap()
            .with_join_timeout(Duration::from_millis(200));
        let mut rt = TcpRuntime::new(config);

        // Accept and hold the connection without ever answering
        let holder = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(600));
            drop(stream);
        });

        assert!(matches!(rt.join(), Err(Error::Timeout(_))));
        holder.join().unwrap();
    }

    #[test]
    fn unreachable_coordinator_fails_join() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let config = MemberConfig::new(0, 1, addr)
            .unwrap()
            .with_join_timeout(Duration::from_millis(200));
        let mut rt = TcpRuntime::new(config);
        assert!(rt.join().is_err());
    }
}
