//! Transport-independent session engine
//!
//! A [`ListenSocket`] owns the user table, the access and send pools and the
//! reaper thread. Transports feed it raw frames through
//! [`ListenSocket::handle_frame`] and deliver whatever it hands back through
//! the [`Transport`] trait, so datagram and stream servers share every bit of
//! login, logout, action and liveness handling.

use crate::access::{self, AccessJob};
use crate::config::{ServerConfig, TimeoutConfig};
use crate::control::PacketSink;
use crate::database::Database;
use crate::error::ServerError;
use crate::pool::ThreadPool;
use crate::reaper;
use crate::user::{BaseUser, Peer, UserTable};
use crate::zone::Zone;
use log::{debug, info, trace, warn};
use shared::frame;
use shared::proto::{type_name, ACCESS_VIEW, PNGPKT};
use shared::{Packet, SessionCipher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::thread::{self, JoinHandle};

/// Low-level delivery of sealed frames to a peer
pub trait Transport: Send + Sync {
    fn send_frame(&self, peer: &Peer, frame: &[u8]) -> Result<(), ServerError>;

    /// Releases whatever the transport holds for `peer`
    fn close_peer(&self, _peer: &Peer) {}
}

/// Packets bound for one peer, sealed with the session current at enqueue
pub struct SendJob {
    pub peer: Peer,
    pub session: Option<SessionCipher>,
    pub packets: Vec<Packet>,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    logins: AtomicU64,
    rejected_logins: AtomicU64,
    reaped: AtomicU64,
    pings: AtomicU64,
}

/// Point-in-time server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub users: usize,
    pub pending_logouts: usize,
    pub received: u64,
    pub dropped: u64,
    pub logins: u64,
    pub rejected_logins: u64,
    pub reaped: u64,
    pub pings: u64,
}

pub struct ListenSocket {
    timeouts: TimeoutConfig,
    users: UserTable,
    transport: Arc<dyn Transport>,
    database: Arc<dyn Database>,
    zone: Arc<Zone>,
    access_pool: OnceLock<ThreadPool<AccessJob>>,
    send_pool: OnceLock<ThreadPool<SendJob>>,
    counters: Counters,
    running: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<ListenSocket>,
}

impl ListenSocket {
    pub fn new(
        config: &ServerConfig,
        transport: Arc<dyn Transport>,
        database: Arc<dyn Database>,
        zone: Arc<Zone>,
    ) -> Result<Arc<Self>, ServerError> {
        let listen = Arc::new_cyclic(|self_ref| ListenSocket {
            timeouts: config.timeouts.clone(),
            users: UserTable::new(),
            transport,
            database,
            zone,
            access_pool: OnceLock::new(),
            send_pool: OnceLock::new(),
            counters: Counters::default(),
            running: AtomicBool::new(true),
            reaper: Mutex::new(None),
            self_ref: self_ref.clone(),
        });

        let weak = Arc::downgrade(&listen);
        let access_pool = ThreadPool::new("access", config.pools.access, {
            let weak = weak.clone();
            move |job: AccessJob| match weak.upgrade() {
                Some(listen) => access::handle_access(&listen, job),
                None => Ok(()),
            }
        })?;
        let send_pool = ThreadPool::new("send", config.pools.send, move |job: SendJob| {
            match weak.upgrade() {
                Some(listen) => listen.deliver(job),
                None => Ok(()),
            }
        })?;
        let _ = listen.access_pool.set(access_pool);
        let _ = listen.send_pool.set(send_pool);

        Ok(listen)
    }

    /// Starts the reaper thread
    pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        let handle = reaper::spawn(Arc::downgrade(self), self.timeouts.reaper_interval())?;
        *self.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reaper {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Reaper panicked");
            }
        }
        if let Some(pool) = self.access_pool.get() {
            pool.shutdown();
        }
        if let Some(pool) = self.send_pool.get() {
            pool.shutdown();
        }
        info!("Listening socket shut down with {} users", self.users.len());
    }

    pub fn users(&self) -> &UserTable {
        &self.users
    }

    pub fn zone(&self) -> &Arc<Zone> {
        &self.zone
    }

    pub fn database(&self) -> &dyn Database {
        self.database.as_ref()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Weak handle controls use to reach their user
    pub fn sink(&self) -> Weak<dyn PacketSink> {
        self.self_ref.clone()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            users: self.users.len(),
            pending_logouts: self.users.pending_count(),
            received: self.counters.received.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            logins: self.counters.logins.load(Ordering::Relaxed),
            rejected_logins: self.counters.rejected_logins.load(Ordering::Relaxed),
            reaped: self.counters.reaped.load(Ordering::Relaxed),
            pings: self.counters.pings.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn count_login(&self) {
        self.counters.logins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_rejected_login(&self) {
        self.counters.rejected_logins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_reaped(&self) {
        self.counters.reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_ping(&self) {
        self.counters.pings.fetch_add(1, Ordering::Relaxed);
    }

    fn drop_frame(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry point for every frame a transport receives
    pub fn handle_frame(&self, peer: Peer, bytes: &[u8]) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let user = self.users.find_by_peer(&peer);
        let session = user.as_ref().and_then(|user| user.session());
        let packet = match frame::open(bytes, session.as_ref()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping malformed packet from {}: {}", peer, e);
                self.drop_frame();
                return;
            }
        };

        let Some(user) = user else {
            match packet {
                Packet::Login(request) => self.queue_access(AccessJob::Login {
                    peer,
                    request: Box::new(request),
                }),
                other => {
                    debug!(
                        "Dropping {} from unknown peer {}",
                        type_name(other.kind()),
                        peer
                    );
                    self.drop_frame();
                }
            }
            return;
        };

        user.touch();
        match packet {
            Packet::Login(_) => {
                let authorised = user
                    .control()
                    .is_some_and(|control| control.access() >= ACCESS_VIEW);
                if !authorised {
                    debug!("User {} repeated login without access", user.userid());
                } else if user.pending_logout() {
                    info!("User {} cancelled logout", user.userid());
                    user.set_pending_logout(false);
                }
            }
            Packet::Logout(_) => self.queue_access(AccessJob::Logout {
                userid: user.userid(),
            }),
            Packet::Action(request) => self.submit_action(&user, request),
            Packet::Ack(ack) => {
                trace!(
                    "User {} acknowledged {}",
                    user.userid(),
                    type_name(ack.request)
                );
            }
            Packet::Ping(_) => {
                if let Err(e) = self.send_packets(&user, vec![Packet::ack(PNGPKT, [0; 4])]) {
                    warn!("Ping reply to user {} failed: {}", user.userid(), e);
                }
            }
            other => {
                warn!(
                    "Unsupported {} from user {}",
                    type_name(other.kind()),
                    user.userid()
                );
                self.drop_frame();
            }
        }
    }

    /// A stream peer went away; its user (if any) is flagged for the reaper
    ///
    /// Returns whether a user was bound to the peer.
    pub fn peer_closed(&self, peer: &Peer) -> bool {
        match self.users.find_by_peer(peer) {
            Some(user) => {
                info!("Connection for user {} closed", user.userid());
                user.set_pending_logout(true);
                true
            }
            None => false,
        }
    }

    fn submit_action(&self, user: &BaseUser, request: shared::proto::ActionRequest) {
        if user.pending_logout() {
            debug!("Ignoring action from departing user {}", user.userid());
            self.drop_frame();
            return;
        }

        let Some(control) = user.control() else {
            self.drop_frame();
            return;
        };
        if let Err(e) = self.zone.submit_action(control, request) {
            warn!("Action from user {} dropped: {}", user.userid(), e);
        }
    }

    fn queue_access(&self, job: AccessJob) {
        let result = match self.access_pool.get() {
            Some(pool) => pool.push(job),
            None => Err(ServerError::PoolClosed("access")),
        };
        if let Err(e) = result {
            warn!("Access request dropped: {}", e);
            self.drop_frame();
        }
    }

    /// Stamps per-user sequence numbers and queues the packets in order
    pub fn send_packets(&self, user: &BaseUser, mut packets: Vec<Packet>) -> Result<(), ServerError> {
        for packet in packets.iter_mut() {
            packet.set_sequence(user.next_sequence());
        }
        let job = SendJob {
            peer: user.peer(),
            session: user.session(),
            packets,
        };
        self.send_pool
            .get()
            .ok_or(ServerError::PoolClosed("send"))?
            .push(job)
    }

    fn deliver(&self, job: SendJob) -> Result<(), ServerError> {
        for packet in &job.packets {
            let sealed = frame::seal(packet, job.session.as_ref())?;
            self.transport.send_frame(&job.peer, &sealed)?;
            trace!(
                "Sent {} seq {} to {}",
                type_name(packet.kind()),
                packet.sequence(),
                job.peer
            );
        }
        Ok(())
    }
}

impl PacketSink for ListenSocket {
    fn send_to_user(&self, userid: u64, packet: Packet) -> Result<(), ServerError> {
        let user = self
            .users
            .get(userid)
            .ok_or_else(|| ServerError::PeerGone(format!("user {}", userid)))?;
        self.send_packets(&user, vec![packet])
    }
}

impl Drop for ListenSocket {
    fn drop(&mut self) {
        self.shutdown();
    }
}
