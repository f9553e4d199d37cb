/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Socket I/O for the wireless and wired links.
//!
//! | Link | Transport | Direction |
//! |---|---|---|
//! | [`UdpBroadcastLink`] | UDP, `SO_BROADCAST` | WL-1 RX from vehicles, rebroadcast TX |
//! | [`TcpUplink`] | TCP client | RSU-2 reports out, immediate server responses in |
//! | [`TcpCommandServer`] | TCP listener | one server command per connection |
//!
//! Receivers wait with a bounded timeout (socket read timeouts, or a `mio`
//! readiness poll for the command listener) and return `Ok(None)` when
//! nothing arrived, so worker threads see the shutdown flag promptly.

use std::io::{self, Read, Write};
use std::net::{
    IpAddr, Shutdown as SocketShutdown, SocketAddr, TcpListener, TcpStream, UdpSocket,
};
use std::os::fd::AsRawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

/// Largest datagram read from the wireless socket.
const MAX_DATAGRAM: usize = 1500;

// ── Traits ────────────────────────────────────────────────────────────────────

/// Inbound half of a link.
pub trait FrameSource: Send + Sync {
    /// One frame, `Ok(None)` if none arrived within the poll interval.
    ///
    /// An `Err` means the link is unusable; the caller stops reading.
    fn recv(&self) -> io::Result<Option<Vec<u8>>>;

    /// Unblock and release the link.  Called once during shutdown.
    fn close(&self) {}
}

/// Outbound half of a link.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: &[u8]) -> io::Result<()>;
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// ── UdpBroadcastLink ──────────────────────────────────────────────────────────

/// WL-1 socket: receives vehicle broadcasts, sends RSU rebroadcasts.
#[derive(Debug)]
pub struct UdpBroadcastLink {
    socket: UdpSocket,
    broadcast: SocketAddr,
}

impl UdpBroadcastLink {
    /// Bind `bind_ip:listen_port` and enable broadcast to `broadcast`.
    pub fn bind(
        bind_ip: IpAddr,
        listen_port: u16,
        broadcast: SocketAddr,
        poll: Duration,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind((bind_ip, listen_port))?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(poll))?;
        info!(local = %socket.local_addr()?, %broadcast, "wireless link bound");
        Ok(Self { socket, broadcast })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl FrameSource for UdpBroadcastLink {
    fn recv(&self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                trace!(%from, len = n, "WL-1 datagram");
                Ok(Some(buf[..n].to_vec()))
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl FrameSink for UdpBroadcastLink {
    fn send(&self, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, self.broadcast).map(|_| ())
    }
}

// ── TcpUplink ─────────────────────────────────────────────────────────────────

/// Persistent connection to the traffic server.
///
/// `send` and `recv` run on different threads; a `&TcpStream` is both
/// `Read` and `Write`, so only the partial-frame buffer needs a lock.
#[derive(Debug)]
pub struct TcpUplink {
    stream: TcpStream,
    frame_len: usize,
    partial: Mutex<Vec<u8>>,
}

impl TcpUplink {
    /// Connect to `server` and read responses in `frame_len` units.
    pub fn connect(
        server: SocketAddr,
        connect_timeout: Duration,
        poll: Duration,
        frame_len: usize,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&server, connect_timeout)?;
        stream.set_read_timeout(Some(poll))?;
        stream.set_nodelay(true)?;
        info!(%server, local = %stream.local_addr()?, "uplink connected");
        Ok(Self {
            stream,
            frame_len,
            partial: Mutex::new(Vec::with_capacity(frame_len)),
        })
    }
}

impl FrameSink for TcpUplink {
    fn send(&self, frame: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(frame)
    }
}

impl FrameSource for TcpUplink {
    fn recv(&self) -> io::Result<Option<Vec<u8>>> {
        let mut partial = self.partial.lock();
        let mut chunk = vec![0u8; self.frame_len - partial.len()];
        match (&self.stream).read(&mut chunk) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the uplink",
            )),
            Ok(n) => {
                partial.extend_from_slice(&chunk[..n]);
                if partial.len() == self.frame_len {
                    Ok(Some(std::mem::take(&mut *partial)))
                } else {
                    Ok(None)
                }
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&self) {
        if let Err(e) = self.stream.shutdown(SocketShutdown::Both) {
            debug!(error = %e, "uplink shutdown");
        }
    }
}

// ── TcpCommandServer ──────────────────────────────────────────────────────────

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

#[derive(Debug)]
struct Readiness {
    poll: Poll,
    events: Events,
}

/// Listener for server-initiated commands: accept, read one frame, close.
///
/// `recv` waits for the listener to become readable with a `mio` poll
/// bounded by the poll interval; [`close`](FrameSource::close) fires a
/// waker so a waiting `recv` returns at once.
#[derive(Debug)]
pub struct TcpCommandServer {
    listener: TcpListener,
    readiness: Mutex<Readiness>,
    waker: Waker,
    frame_len: usize,
    poll: Duration,
}

impl TcpCommandServer {
    pub fn bind(addr: SocketAddr, poll: Duration, frame_len: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        let readiness = Readiness {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
        };
        readiness.poll.registry().register(
            &mut SourceFd(&listener.as_raw_fd()),
            LISTENER,
            Interest::READABLE,
        )?;
        let waker = Waker::new(readiness.poll.registry(), WAKER)?;

        info!(local = %listener.local_addr()?, "command server listening");
        Ok(Self {
            listener,
            readiness: Mutex::new(readiness),
            waker,
            frame_len,
            poll,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one pending connection and read its frame.
    ///
    /// `Ok(None)` when no connection is pending or the peer sent a short
    /// frame.
    fn accept_command(&self) -> io::Result<Option<Vec<u8>>> {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        match self.read_command(stream) {
            Ok(frame) => {
                trace!(%peer, "server command received");
                Ok(Some(frame))
            }
            Err(e) => {
                debug!(%peer, error = %e, "incomplete server command dropped");
                Ok(None)
            }
        }
    }

    fn read_command(&self, mut stream: TcpStream) -> io::Result<Vec<u8>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.poll.max(Duration::from_millis(500))))?;
        let mut frame = vec![0u8; self.frame_len];
        stream.read_exact(&mut frame)?;
        Ok(frame)
    }

    /// Block until the listener is readable, the waker fires or the poll
    /// interval elapses.  Returns `false` when woken by `close`.
    fn wait_readable(&self) -> io::Result<bool> {
        let mut guard = self.readiness.lock();
        let Readiness { poll, events } = &mut *guard;
        match poll.poll(events, Some(self.poll)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(true),
            Err(e) => return Err(e),
        }
        Ok(!events.iter().any(|event| event.token() == WAKER))
    }
}

impl FrameSource for TcpCommandServer {
    fn recv(&self) -> io::Result<Option<Vec<u8>>> {
        // Readiness is edge-triggered: drain the backlog before waiting.
        if let Some(frame) = self.accept_command()? {
            return Ok(Some(frame));
        }
        if !self.wait_readable()? {
            return Ok(None);
        }
        self.accept_command()
    }

    fn close(&self) {
        if let Err(e) = self.waker.wake() {
            debug!(error = %e, "command server wake");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(20);
    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn recv_within(src: &dyn FrameSource, limit: Duration) -> Option<Vec<u8>> {
        let start = Instant::now();
        while start.elapsed() < limit {
            if let Some(frame) = src.recv().unwrap() {
                return Some(frame);
            }
        }
        None
    }

    #[test]
    fn udp_link_times_out_then_receives() {
        let rx = UdpBroadcastLink::bind(LOCALHOST, 0, (LOCALHOST, 9).into(), POLL).unwrap();
        assert_eq!(rx.recv().unwrap(), None);

        let port = rx.local_addr().unwrap().port();
        let tx = UdpBroadcastLink::bind(LOCALHOST, 0, (LOCALHOST, port).into(), POLL).unwrap();
        tx.send(&[1, 2, 3]).unwrap();
        assert_eq!(recv_within(&rx, Duration::from_secs(2)), Some(vec![1, 2, 3]));
    }

    #[test]
    fn uplink_reassembles_split_frames() {
        let listener = TcpListener::bind((LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut got = [0u8; 4];
            s.read_exact(&mut got).unwrap();
            s.write_all(&[9, 9]).unwrap();
            thread::sleep(Duration::from_millis(50));
            s.write_all(&[9, 9]).unwrap();
            got
        });

        let uplink = TcpUplink::connect(addr, Duration::from_secs(1), POLL, 4).unwrap();
        uplink.send(&[1, 2, 3, 4]).unwrap();
        assert_eq!(recv_within(&uplink, Duration::from_secs(2)), Some(vec![9, 9, 9, 9]));
        assert_eq!(server.join().unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn uplink_reports_closed_connection() {
        let listener = TcpListener::bind((LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || drop(listener.accept().unwrap()));

        let uplink = TcpUplink::connect(addr, Duration::from_secs(1), POLL, 4).unwrap();
        server.join().unwrap();
        let start = Instant::now();
        let err = loop {
            match uplink.recv() {
                Err(e) => break e,
                Ok(_) => assert!(start.elapsed() < Duration::from_secs(2)),
            }
        };
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn command_server_reads_one_frame_per_connection() {
        let server = TcpCommandServer::bind((LOCALHOST, 0).into(), POLL, 4).unwrap();
        assert_eq!(server.recv().unwrap(), None);

        let addr = server.local_addr().unwrap();
        let client = thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            s.write_all(&[5, 6, 7, 8]).unwrap();
        });
        assert_eq!(recv_within(&server, Duration::from_secs(2)), Some(vec![5, 6, 7, 8]));
        client.join().unwrap();
    }

    #[test]
    fn command_server_wakes_on_connection_not_poll_interval() {
        let poll = Duration::from_secs(5);
        let server = TcpCommandServer::bind((LOCALHOST, 0).into(), poll, 4).unwrap();
        let addr = server.local_addr().unwrap();
        let client = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut s = TcpStream::connect(addr).unwrap();
            s.write_all(&[1, 2, 3, 4]).unwrap();
        });

        let start = Instant::now();
        assert_eq!(server.recv().unwrap(), Some(vec![1, 2, 3, 4]));
        assert!(start.elapsed() < Duration::from_secs(2));
        client.join().unwrap();
    }

    #[test]
    fn command_server_close_unblocks_recv() {
        let server = Arc::new(
            TcpCommandServer::bind((LOCALHOST, 0).into(), Duration::from_secs(5), 4).unwrap(),
        );
        let closer = Arc::clone(&server);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            closer.close();
        });

        let start = Instant::now();
        assert_eq!(server.recv().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
