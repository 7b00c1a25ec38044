use crate::cache::ObjectCache;
use crate::dispatch::Dispatcher;
use crate::error::CommError;
use log::{debug, error, info, warn};
use shared::frame::{self, MAX_FRAME};
use shared::proto::{type_name, LGTREQ, LOGREQ};
use shared::{KeyPair, Packet, SessionCipher};
use socket2::SockRef;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

/// Traffic counters, readable while the engine runs
#[derive(Debug, Default)]
pub struct CommStats {
    sent: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`CommStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub dispatched: u64,
    pub dropped: u64,
}

impl CommStats {
    pub(crate) fn count_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the caller, the send worker and the receive worker
pub(crate) struct Shared {
    socket: UdpSocket,
    remote: SocketAddr,
    pub(crate) identity: KeyPair,
    queue: Mutex<VecDeque<Packet>>,
    available: Condvar,
    exit: AtomicBool,
    sequence: AtomicU64,
    pub(crate) session: RwLock<Option<SessionCipher>>,
    pub(crate) access: AtomicU64,
    pub(crate) object: AtomicU64,
    pub(crate) cache: Arc<dyn ObjectCache>,
    pub(crate) stats: CommStats,
}

impl Shared {
    /// Stamps the next sequence number and hands the packet to the send worker
    pub(crate) fn enqueue(&self, mut packet: Packet) -> Result<(), CommError> {
        if self.exit.load(Ordering::SeqCst) {
            return Err(CommError::Closed);
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        packet.set_sequence(self.sequence.fetch_add(1, Ordering::SeqCst));
        queue.push_back(packet);
        self.available.notify_one();
        Ok(())
    }

    fn current_session(&self) -> Option<SessionCipher> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transmit(&self, packet: &Packet) {
        let session = self.current_session();
        let frame = match frame::seal(packet, session.as_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to seal {} packet: {}", type_name(packet.kind()), e);
                self.stats.count_dropped();
                return;
            }
        };

        match self.socket.send_to(&frame, self.remote) {
            Ok(_) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Sent {} seq {} ({} bytes)",
                    type_name(packet.kind()),
                    packet.sequence(),
                    frame.len()
                );
            }
            Err(e) => error!("Error sending {} packet: {}", type_name(packet.kind()), e),
        }
    }

    fn receive(&self, dispatcher: &Dispatcher, bytes: &[u8], from: SocketAddr) {
        if from != self.remote {
            warn!("Dropping datagram from unexpected sender {}", from);
            self.stats.count_dropped();
            return;
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let session = self.current_session();
        match frame::open(bytes, session.as_ref()) {
            Ok(packet) => dispatcher.dispatch(self, packet),
            Err(e) => {
                warn!("Dropping malformed datagram ({} bytes): {}", bytes.len(), e);
                self.stats.count_dropped();
            }
        }
    }
}

/// Client-side communication engine
///
/// Owns one UDP socket bound to an ephemeral port and two worker threads.
/// Outbound packets are queued in FIFO order and sent by the send worker;
/// inbound datagrams are accepted only from the configured server and routed
/// through the dispatch table. Dropping the engine stops and joins both
/// workers.
pub struct Comm {
    shared: Arc<Shared>,
    send_thread: Option<JoinHandle<()>>,
    recv_thread: Option<JoinHandle<()>>,
}

impl Comm {
    pub fn new(
        remote: SocketAddr,
        identity: KeyPair,
        cache: Arc<dyn ObjectCache>,
    ) -> Result<Self, CommError> {
        let bind_ip = match remote.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0)).map_err(CommError::Socket)?;
        info!(
            "Comm bound to {} for server {}",
            socket.local_addr().map_err(CommError::Socket)?,
            remote
        );

        let shared = Arc::new(Shared {
            socket,
            remote,
            identity,
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            exit: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            session: RwLock::new(None),
            access: AtomicU64::new(0),
            object: AtomicU64::new(0),
            cache,
            stats: CommStats::default(),
        });

        let mut comm = Comm {
            shared: Arc::clone(&shared),
            send_thread: None,
            recv_thread: None,
        };

        let sender = Arc::clone(&shared);
        comm.send_thread = Some(
            thread::Builder::new()
                .name("comm-send".into())
                .spawn(move || send_loop(sender))
                .map_err(|source| CommError::Spawn {
                    name: "send",
                    source,
                })?,
        );

        // A failed spawn here drops `comm`, which stops the send worker
        let receiver = Arc::clone(&shared);
        comm.recv_thread = Some(
            thread::Builder::new()
                .name("comm-recv".into())
                .spawn(move || recv_loop(receiver))
                .map_err(|source| CommError::Spawn {
                    name: "receive",
                    source,
                })?,
        );

        Ok(comm)
    }

    /// Queues a LOGREQ carrying this client's public key
    pub fn send_login(&self, username: &str, charname: &str) -> Result<(), CommError> {
        let der = self.shared.identity.public_der()?;
        let packet = Packet::login(username, charname, &der)?;
        info!("Logging in as {} ({})", username, charname);
        self.shared.enqueue(packet)
    }

    pub fn send_action_request(
        &self,
        object_id: u64,
        action_id: u16,
        power_level: u8,
        source: [u64; 3],
        dest_object_id: u64,
        dest: [i64; 3],
    ) -> Result<(), CommError> {
        self.shared.enqueue(Packet::action(
            object_id,
            action_id,
            power_level,
            source,
            dest_object_id,
            dest,
        ))
    }

    pub fn send_logout(&self) -> Result<(), CommError> {
        self.shared.enqueue(Packet::logout())
    }

    /// Acknowledges a request of type `request`
    pub fn send_ack(&self, request: u8) -> Result<(), CommError> {
        self.shared.enqueue(Packet::ack(request, [0; 4]))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn session_established(&self) -> bool {
        self.shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Access level granted by the last login response, if any
    pub fn access_level(&self) -> Option<u64> {
        match self.shared.access.load(Ordering::SeqCst) {
            0 => None,
            level => Some(level),
        }
    }

    /// Object bound to this client's character by the last login response
    pub fn object_id(&self) -> Option<u64> {
        match self.shared.object.load(Ordering::SeqCst) {
            0 => None,
            object_id => Some(object_id),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CommError> {
        self.shared.socket.local_addr().map_err(CommError::Socket)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    fn shutdown(&mut self) {
        self.shared.exit.store(true, Ordering::SeqCst);
        {
            let _queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.available.notify_all();
        }

        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("Send worker panicked");
            }
        }

        if let Some(handle) = self.recv_thread.take() {
            self.wake_receiver();
            if handle.join().is_err() {
                error!("Receive worker panicked");
            }
        }
        debug!("Comm shut down");
    }

    fn wake_receiver(&self) {
        let socket = &self.shared.socket;
        let _ = SockRef::from(socket).shutdown(Shutdown::Read);

        // Shutting down a UDP socket does not interrupt recv on every
        // platform, so poke it with an empty datagram as well
        if let Ok(mut local) = socket.local_addr() {
            if local.ip().is_unspecified() {
                local.set_ip(match local {
                    SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
                });
            }
            let _ = socket.send_to(&[], local);
        }
    }
}

impl Drop for Comm {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_loop(shared: Arc<Shared>) {
    loop {
        let packet = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            while queue.is_empty() && !shared.exit.load(Ordering::SeqCst) {
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            // Whatever was queued before shutdown still goes out
            match queue.pop_front() {
                Some(packet) => packet,
                None => break,
            }
        };

        shared.transmit(&packet);
    }
    debug!("Send worker exiting");
}

fn recv_loop(shared: Arc<Shared>) {
    let dispatcher = Dispatcher::new();
    let mut buffer = [0u8; MAX_FRAME];

    loop {
        let result = shared.socket.recv_from(&mut buffer);
        if shared.exit.load(Ordering::SeqCst) {
            break;
        }

        match result {
            Ok((len, from)) => shared.receive(&dispatcher, &buffer[..len], from),
            Err(e) => error!("Error receiving packet: {}", e),
        }
    }
    debug!("Receive worker exiting");
}

/// Human-readable label for an acknowledged request type
pub(crate) fn response_label(request: u8) -> Option<&'static str> {
    match request {
        LOGREQ => Some("Login"),
        LGTREQ => Some("Logout"),
        _ => None,
    }
}
