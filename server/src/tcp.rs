//! Stream listener
//!
//! Each accepted connection gets its own reader thread and a `Peer::Stream`
//! id. Frames travel with a big-endian `u16` length prefix. A reader that
//! sees end-of-stream or an error flags the user for logout; the reaper
//! finishes the job. Connections that never log in are closed by their own
//! reader once the login timeout passes.

use crate::config::ServerConfig;
use crate::database::Database;
use crate::error::ServerError;
use crate::listen::{ListenSocket, Transport};
use crate::user::Peer;
use crate::zone::Zone;
use log::{debug, error, info, warn};
use shared::frame::MAX_FRAME;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Reads one length-prefixed frame; `None` on a clean end of stream
///
/// A read timeout before the first byte consumes nothing and surfaces as an
/// idle error (see [`is_idle`]). Once a frame has started, a timeout is a
/// broken frame.
pub fn read_frame(stream: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 2];
    loop {
        match stream.read(&mut prefix[..1]) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    stream.read_exact(&mut prefix[1..]).map_err(mid_frame)?;

    let len = usize::from(u16::from_be_bytes(prefix));
    if len == 0 || len > MAX_FRAME {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame length {} out of range", len),
        ));
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).map_err(mid_frame)?;
    Ok(Some(frame))
}

/// Whether a read error is just the read timeout expiring
pub fn is_idle(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn mid_frame(error: io::Error) -> io::Error {
    if is_idle(&error) {
        io::Error::new(ErrorKind::UnexpectedEof, "frame stalled part way")
    } else {
        error
    }
}

/// Writes `frame` behind its length prefix in a single write
pub fn write_frame(stream: &mut impl Write, frame: &[u8]) -> Result<(), ServerError> {
    let len = u16::try_from(frame.len()).map_err(|_| ServerError::FrameTooLarge(frame.len()))?;
    let mut buffer = Vec::with_capacity(frame.len() + 2);
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(frame);
    stream.write_all(&buffer)?;
    Ok(())
}

struct Connection {
    writer: Mutex<TcpStream>,
    /// Shuts the socket down without waiting on a blocked writer
    handle: TcpStream,
}

impl Connection {
    fn close(&self) {
        let _ = self.handle.shutdown(Shutdown::Both);
    }
}

/// Write halves of every open connection
///
/// Each connection has its own write lock, so a peer that stops reading
/// only ever stalls writes to itself.
#[derive(Default)]
pub struct TcpTransport {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
}

impl TcpTransport {
    fn add(&self, id: u64, stream: TcpStream) -> io::Result<()> {
        let connection = Connection {
            handle: stream.try_clone()?,
            writer: Mutex::new(stream),
        };
        self.lock().insert(id, Arc::new(connection));
        Ok(())
    }

    fn connection(&self, id: u64) -> Option<Arc<Connection>> {
        self.lock().get(&id).cloned()
    }

    fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    fn close_all(&self) {
        for (_, connection) in self.lock().drain() {
            connection.close();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for TcpTransport {
    fn send_frame(&self, peer: &Peer, frame: &[u8]) -> Result<(), ServerError> {
        let Peer::Stream(id) = peer else {
            return Err(ServerError::PeerGone(peer.to_string()));
        };
        let connection = self
            .connection(*id)
            .ok_or_else(|| ServerError::PeerGone(peer.to_string()))?;
        let mut writer = connection
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        write_frame(&mut *writer, frame).map_err(|e| {
            // A partial write leaves the stream out of frame
            warn!("Write to {} failed, closing: {}", peer, e);
            connection.close();
            e
        })
    }

    fn close_peer(&self, peer: &Peer) {
        if let Peer::Stream(id) = peer {
            let connection = self.lock().remove(id);
            if let Some(connection) = connection {
                connection.close();
                debug!("Closed connection {}", id);
            }
        }
    }
}

pub struct TcpServer {
    listen: Arc<ListenSocket>,
    transport: Arc<TcpTransport>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    readers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TcpServer {
    pub fn bind(
        config: &ServerConfig,
        database: Arc<dyn Database>,
        zone: Arc<Zone>,
    ) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(&config.listen.address).map_err(|source| ServerError::Bind {
                addr: config.listen.address.clone(),
                source,
            })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {} (tcp)", local_addr);

        let transport = Arc::new(TcpTransport::default());
        let listen = ListenSocket::new(config, transport.clone(), database, zone)?;
        listen.start()?;

        let running = Arc::new(AtomicBool::new(true));
        let readers = Arc::new(Mutex::new(Vec::new()));
        let acceptor = thread::Builder::new()
            .name("tcp-accept".into())
            .spawn({
                let acceptor = Acceptor {
                    listener,
                    login_timeout: config.timeouts.login_timeout(),
                    write_timeout: config.timeouts.write_timeout(),
                    listen: Arc::clone(&listen),
                    transport: Arc::clone(&transport),
                    running: Arc::clone(&running),
                    readers: Arc::clone(&readers),
                    next_id: AtomicU64::new(1),
                };
                move || acceptor.run()
            })
            .map_err(|source| ServerError::Spawn {
                name: "tcp acceptor".into(),
                source,
            })?;

        Ok(Self {
            listen,
            transport,
            local_addr,
            running,
            acceptor: Some(acceptor),
            readers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listen(&self) -> &Arc<ListenSocket> {
        &self.listen
    }

    pub fn connection_count(&self) -> usize {
        self.transport.connection_count()
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            if handle.join().is_err() {
                error!("TCP acceptor panicked");
            }
        }

        // Readers block on their sockets; closing them is what wakes them
        self.transport.close_all();
        let readers = std::mem::take(
            &mut *self.readers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in readers {
            if handle.join().is_err() {
                error!("TCP reader panicked");
            }
        }
        self.listen.shutdown();
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Acceptor {
    listener: TcpListener,
    login_timeout: Duration,
    write_timeout: Duration,
    listen: Arc<ListenSocket>,
    transport: Arc<TcpTransport>,
    running: Arc<AtomicBool>,
    readers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    next_id: AtomicU64,
}

impl Acceptor {
    fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = self.admit(stream, addr) {
                        warn!("Rejected connection from {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        info!("TCP acceptor stopped");
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.login_timeout))?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.transport.add(id, stream.try_clone()?)?;

        let listen = Arc::clone(&self.listen);
        let transport = Arc::clone(&self.transport);
        let login_timeout = self.login_timeout;
        let handle = thread::Builder::new()
            .name(format!("tcp-conn-{}", id))
            .spawn(move || {
                read_loop(stream, Peer::Stream(id), &listen, &transport, login_timeout)
            })
            .map_err(|source| {
                self.transport.forget(id);
                ServerError::Spawn {
                    name: format!("connection {}", id),
                    source,
                }
            })?;

        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        readers.retain(|reader| !reader.is_finished());
        readers.push(handle);
        debug!("Connection {} from {}", id, addr);
        Ok(())
    }
}

fn read_loop(
    mut stream: TcpStream,
    peer: Peer,
    listen: &ListenSocket,
    transport: &TcpTransport,
    login_timeout: Duration,
) {
    let admitted = Instant::now();
    loop {
        match read_frame(&mut stream) {
            Ok(Some(frame)) => listen.handle_frame(peer, &frame),
            Ok(None) => {
                debug!("{} closed by remote", peer);
                break;
            }
            Err(e) if is_idle(&e) => {}
            Err(e) => {
                debug!("{} read failed: {}", peer, e);
                break;
            }
        }

        if admitted.elapsed() >= login_timeout && listen.users().find_by_peer(&peer).is_none() {
            info!("{} has no logged-in user after {:?}, closing", peer, login_timeout);
            transport.close_peer(&peer);
            break;
        }
    }

    // A bound user keeps its connection entry until the reaper closes it
    if !listen.peer_closed(&peer) {
        if let Peer::Stream(id) = peer {
            transport.forget(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use crate::listen::tests::wait_until;
    use crate::runtime::World;
    use std::io::Cursor;

    fn connected_pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_frame_prefix_round_trip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[1, 2, 3]).unwrap();
        write_frame(&mut wire, &[4]).unwrap();
        assert_eq!(&wire[..2], &[0, 3]);

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(vec![4]));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_oversized_frames() {
        let mut sink = Vec::new();
        assert!(matches!(
            write_frame(&mut sink, &vec![0; 70_000]),
            Err(ServerError::FrameTooLarge(70_000))
        ));

        let mut cursor = Cursor::new(vec![0xff, 0xff, 0]);
        assert_eq!(
            read_frame(&mut cursor).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
        let mut cursor = Cursor::new(vec![0, 0]);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut cursor = Cursor::new(vec![0, 5, 1, 2]);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let transport = TcpTransport::default();
        assert!(transport.send_frame(&Peer::Stream(3), &[1]).is_err());
        assert!(transport
            .send_frame(&Peer::Datagram(SocketAddr::from(([127, 0, 0, 1], 1))), &[1])
            .is_err());
    }

    #[test]
    fn test_idle_read_consumes_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (mut client, mut server) = connected_pair(&listener);
        server
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();

        assert!(is_idle(&read_frame(&mut server).unwrap_err()));
        write_frame(&mut client, &[9, 8, 7]).unwrap();
        assert_eq!(read_frame(&mut server).unwrap(), Some(vec![9, 8, 7]));
    }

    #[test]
    fn test_stalled_peer_does_not_block_others() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let transport = Arc::new(TcpTransport::default());
        let (_stalled, a) = connected_pair(&listener);
        let (mut healthy, b) = connected_pair(&listener);
        a.set_write_timeout(Some(Duration::from_millis(500))).unwrap();
        transport.add(1, a).unwrap();
        transport.add(2, b).unwrap();

        // Nobody reads connection 1, so its writes eventually block
        let flood = thread::spawn({
            let transport = Arc::clone(&transport);
            move || {
                let mut sent = 0u64;
                while transport.send_frame(&Peer::Stream(1), &[0; 500]).is_ok() {
                    sent += 1;
                }
                sent
            }
        });
        thread::sleep(Duration::from_millis(200));

        let start = Instant::now();
        transport.send_frame(&Peer::Stream(2), &[7; 10]).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        healthy
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(read_frame(&mut healthy).unwrap(), Some(vec![7; 10]));

        // The blocked writer times out instead of hanging
        assert!(flood.join().unwrap() > 0);
    }

    #[test]
    fn test_connection_without_login_is_closed() {
        let mut config = ServerConfig::default();
        config.listen.address = "127.0.0.1:0".into();
        config.listen.transport = TransportKind::Tcp;
        config.timeouts.login_timeout_ms = 200;
        let world = World::bootstrap(&config).unwrap();
        let server = TcpServer::bind(
            &config,
            Arc::clone(world.database()),
            Arc::clone(world.zone()),
        )
        .unwrap();

        let mut idle = TcpStream::connect(server.local_addr()).unwrap();
        assert!(wait_until(|| server.connection_count() == 1));
        assert!(wait_until(|| server.connection_count() == 0));

        idle.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut byte = [0u8; 1];
        assert!(matches!(idle.read(&mut byte), Ok(0) | Err(_)));
    }
}
