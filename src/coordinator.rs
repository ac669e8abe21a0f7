//! Rendezvous coordinator.
//!
//! The coordinator is the runtime side of group formation. It admits exactly
//! `size` members, answers all of them at once, and later holds every member
//! at the shutdown barrier until the last one has left.
//!
//! Formation is all-or-nothing: a single bad or missing member causes every
//! connected member to be rejected.

use crate::error::{Error, Result};
use crate::runtime::read_with_deadline;
use crate::wire::{self, CoordinatorFrame, MemberFrame};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

/// How often the accept loop re-checks its deadline.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the coordinator learned about one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Rank of the member.
    pub rank: i32,
    /// Host the member reported.
    pub host: String,
    /// OS process id the member reported.
    pub pid: u32,
    /// Whether the member left through the protocol (as opposed to vanishing).
    pub left_cleanly: bool,
}

/// Summary of a completed group lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Size of the group.
    pub size: i32,
    /// Members, indexed by rank.
    pub members: Vec<MemberInfo>,
}

impl Membership {
    /// Ranks that disconnected without leaving.
    pub fn abnormal_departures(&self) -> Vec<i32> {
        self.members
            .iter()
            .filter(|m| !m.left_cleanly)
            .map(|m| m.rank)
            .collect()
    }
}

struct Slot {
    info: MemberInfo,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// The rendezvous server a launcher runs for its group.
pub struct Coordinator {
    listener: TcpListener,
    size: i32,
    join_timeout: Duration,
}

impl Coordinator {
    /// Bind a coordinator for a group of `size` members.
    ///
    /// Use port 0 to let the OS choose; [`local_addr`](Self::local_addr)
    /// reports the result.
    pub fn bind<A: ToSocketAddrs>(addr: A, size: i32, join_timeout: Duration) -> Result<Self> {
        if size < 1 {
            return Err(Error::InvalidSize(size));
        }
        let listener = TcpListener::bind(addr)?;
        Ok(Coordinator {
            listener,
            size,
            join_timeout,
        })
    }

    /// Address members should connect to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Group size this coordinator admits.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Form the group, then wait for every member to leave.
    ///
    /// Returns an error if the group could not be formed; every member that
    /// managed to connect has been sent a `Reject` by then.
    pub fn run(self) -> Result<Membership> {
        let mut slots = self.form()?;
        tracing::info!(size = self.size, "group formed");

        let welcome = CoordinatorFrame::Welcome { size: self.size };
        for slot in &mut slots {
            if let Err(err) = wire::write_frame(&mut slot.writer, &welcome) {
                tracing::warn!(
                    rank = slot.info.rank,
                    error = %err,
                    "member unreachable after formation"
                );
            }
        }

        for slot in &mut slots {
            slot.info.left_cleanly = await_leave(slot);
        }

        for slot in slots.iter_mut().filter(|s| s.info.left_cleanly) {
            if let Err(err) = wire::write_frame(&mut slot.writer, &CoordinatorFrame::Release) {
                tracing::debug!(rank = slot.info.rank, error = %err, "release not delivered");
            }
        }
        tracing::info!(size = self.size, "group released");

        Ok(Membership {
            size: self.size,
            members: slots.into_iter().map(|s| s.info).collect(),
        })
    }

    fn form(&self) -> Result<Vec<Slot>> {
        let deadline = Instant::now() + self.join_timeout;
        let mut joined: Vec<Option<Slot>> = (0..self.size).map(|_| None).collect();
        let mut count = 0;

        self.listener.set_nonblocking(true)?;
        while count < self.size {
            let stream = match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "member connected");
                    stream
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        let reason = format!(
                            "timed out waiting for members: {count} of {} joined",
                            self.size
                        );
                        tracing::warn!(%reason, "group formation failed");
                        reject_all(joined.into_iter().flatten(), &reason);
                        return Err(Error::Timeout(reason));
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            match self.admit(stream, deadline, &joined) {
                Ok(slot) => {
                    let rank = slot.info.rank as usize;
                    tracing::debug!(
                        rank,
                        host = %slot.info.host,
                        pid = slot.info.pid,
                        "member joined"
                    );
                    joined[rank] = Some(slot);
                    count += 1;
                }
                Err((reason, rejected)) => {
                    tracing::warn!(%reason, "group formation failed");
                    reject_all(joined.into_iter().flatten().chain(rejected), &reason);
                    return Err(Error::JoinRejected(reason));
                }
            }
        }

        Ok(joined.into_iter().flatten().collect())
    }

    /// Read and validate one `Join`.
    ///
    /// On failure returns the reason together with the connection (if it is
    /// still worth telling), so the caller can reject it with everyone else.
    fn admit(
        &self,
        stream: TcpStream,
        deadline: Instant,
        joined: &[Option<Slot>],
    ) -> std::result::Result<Slot, (String, Option<Slot>)> {
        let setup = |stream: TcpStream| -> Result<(BufReader<TcpStream>, BufWriter<TcpStream>)> {
            stream.set_nonblocking(false)?;
            stream.set_nodelay(true)?;
            Ok((BufReader::new(stream.try_clone()?), BufWriter::new(stream)))
        };
        let (mut reader, writer) = setup(stream)
            .map_err(|e| (format!("member connection failed: {e}"), None::<Slot>))?;

        let frame: MemberFrame =
            match wire::read_frame_before(&mut reader, deadline, "waiting for join") {
                Ok(frame) => frame,
                Err(err) => return Err((format!("member failed to join: {err}"), None)),
            };
        let MemberFrame::Join {
            rank,
            size,
            host,
            pid,
        } = frame
        else {
            return Err(("member sent leave before joining".into(), None));
        };

        // The shutdown barrier waits without a deadline
        if let Err(err) = reader.get_ref().set_read_timeout(None) {
            return Err((format!("member connection failed: {err}"), None));
        }
        let slot = Slot {
            info: MemberInfo {
                rank,
                host,
                pid,
                left_cleanly: false,
            },
            reader,
            writer,
        };

        if size != self.size {
            let reason = format!(
                "rank {rank} was launched for a group of {size}, coordinator expects {}",
                self.size
            );
            return Err((reason, Some(slot)));
        }
        if rank < 0 || rank >= self.size {
            return Err((format!("rank {rank} is outside [0, {})", self.size), Some(slot)));
        }
        if joined[rank as usize].is_some() {
            return Err((format!("rank {rank} joined twice"), Some(slot)));
        }
        Ok(slot)
    }
}

/// Block until the member in `slot` leaves. Returns whether it left cleanly.
fn await_leave(slot: &mut Slot) -> bool {
    let rank = slot.info.rank;
    match read_with_deadline::<_, MemberFrame>(&mut slot.reader, "waiting for leave") {
        Ok(MemberFrame::Leave { rank: r }) if r == rank => {
            tracing::debug!(rank, "member left");
            true
        }
        Ok(other) => {
            tracing::warn!(rank, frame = ?other, "unexpected frame instead of leave");
            false
        }
        Err(err) => {
            tracing::warn!(rank, error = %err, "member departed without leaving");
            false
        }
    }
}

fn reject_all<I>(slots: I, reason: &str)
where
    I: IntoIterator<Item = Slot>,
{
    let reject = CoordinatorFrame::Reject {
        reason: reason.to_string(),
    };
    for mut slot in slots {
        if let Err(err) = wire::write_frame(&mut slot.writer, &reject) {
            tracing::debug!(rank = slot.info.rank, error = %err, "reject not delivered");
        }
    }
}
