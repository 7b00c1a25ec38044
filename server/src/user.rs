//! Server-side user records and the user table
//!
//! This module tracks every logged-in user, including:
//! - The transport peer the user is reachable at
//! - The session cipher negotiated at login
//! - Liveness (last time any packet arrived) and the pending-logout flag
//! - A per-user outbound sequence counter
//!
//! Records are inserted by the access pool and erased only by the reaper.
//! Every other thread touches a record through an `Arc` and atomics, so a
//! reader never observes a half-removed user.

use crate::control::Control;
use log::{debug, info};
use shared::SessionCipher;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// How a user is reached: a datagram peer address or a stream connection id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    Datagram(SocketAddr),
    Stream(u64),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Datagram(addr) => write!(f, "{}", addr),
            Peer::Stream(id) => write!(f, "conn#{}", id),
        }
    }
}

/// One authenticated user
#[derive(Debug)]
pub struct BaseUser {
    userid: u64,
    peer: Mutex<Peer>,
    control: Mutex<Option<Arc<Control>>>,
    session: RwLock<Option<SessionCipher>>,
    /// Last time we received any packet from this user
    last_seen: Mutex<Instant>,
    pending_logout: AtomicBool,
    sequence: AtomicU64,
}

impl BaseUser {
    pub fn new(userid: u64, peer: Peer) -> Self {
        Self {
            userid,
            peer: Mutex::new(peer),
            control: Mutex::new(None),
            session: RwLock::new(None),
            last_seen: Mutex::new(Instant::now()),
            pending_logout: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn userid(&self) -> u64 {
        self.userid
    }

    pub fn peer(&self) -> Peer {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_peer(&self, peer: Peer) -> Peer {
        std::mem::replace(
            &mut *self.peer.lock().unwrap_or_else(PoisonError::into_inner),
            peer,
        )
    }

    pub fn control(&self) -> Option<Arc<Control>> {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_control(&self, control: Arc<Control>) {
        *self.control.lock().unwrap_or_else(PoisonError::into_inner) = Some(control);
    }

    pub fn take_control(&self) -> Option<Arc<Control>> {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn session(&self) -> Option<SessionCipher> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session(&self, session: SessionCipher) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Marks the user as alive now
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, when: Instant) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = when;
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the last packet, measured against `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        self.idle_for(now) > timeout
    }

    pub fn pending_logout(&self) -> bool {
        self.pending_logout.load(Ordering::SeqCst)
    }

    pub fn set_pending_logout(&self, pending: bool) {
        self.pending_logout.store(pending, Ordering::SeqCst);
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

/// All logged-in users, keyed by userid with a secondary peer index
#[derive(Default)]
pub struct UserTable {
    users: RwLock<HashMap<u64, Arc<BaseUser>>>,
    peers: RwLock<HashMap<Peer, u64>>,
}

impl UserTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user and indexes its peer
    ///
    /// A record already present under the same userid is replaced; callers
    /// normally reuse the existing record through [`UserTable::rebind`].
    pub fn insert(&self, user: Arc<BaseUser>) {
        let userid = user.userid();
        let peer = user.peer();
        self.write_peers().insert(peer, userid);
        if self.write_users().insert(userid, user).is_none() {
            info!("User {} logged in from {}", userid, peer);
        }
    }

    pub fn get(&self, userid: u64) -> Option<Arc<BaseUser>> {
        self.read_users().get(&userid).cloned()
    }

    pub fn contains(&self, userid: u64) -> bool {
        self.read_users().contains_key(&userid)
    }

    /// Finds the user currently bound to `peer`
    pub fn find_by_peer(&self, peer: &Peer) -> Option<Arc<BaseUser>> {
        let userid = *self.read_peers().get(peer)?;
        self.get(userid)
    }

    /// Moves an existing user to a new peer
    pub fn rebind(&self, user: &BaseUser, peer: Peer) {
        let old = user.set_peer(peer);
        let mut peers = self.write_peers();
        if peers.get(&old) == Some(&user.userid()) {
            peers.remove(&old);
        }
        peers.insert(peer, user.userid());
        if old != peer {
            debug!("User {} moved from {} to {}", user.userid(), old, peer);
        }
    }

    /// Drops the peer index entry for a user, leaving the record in place
    pub fn unbind_peer(&self, user: &BaseUser) {
        let peer = user.peer();
        let mut peers = self.write_peers();
        if peers.get(&peer) == Some(&user.userid()) {
            peers.remove(&peer);
        }
    }

    /// Erases a user and every index entry pointing at it
    pub fn remove(&self, userid: u64) -> Option<Arc<BaseUser>> {
        let user = self.write_users().remove(&userid)?;
        self.write_peers().retain(|_, id| *id != userid);
        Some(user)
    }

    /// Point-in-time list of every user
    pub fn snapshot(&self) -> Vec<Arc<BaseUser>> {
        self.read_users().values().cloned().collect()
    }

    pub fn userids(&self) -> Vec<u64> {
        self.read_users().keys().copied().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.read_users()
            .values()
            .filter(|user| user.pending_logout())
            .count()
    }

    pub fn len(&self) -> usize {
        self.read_users().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_users().is_empty()
    }

    fn read_users(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, Arc<BaseUser>>> {
        self.users.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_users(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, Arc<BaseUser>>> {
        self.users.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_peers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Peer, u64>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_peers(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Peer, u64>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
