//! Per-connection authority over a game object

use crate::error::ServerError;
use log::debug;
use shared::Packet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

/// Anything that can deliver a packet to a logged-in user
pub trait PacketSink: Send + Sync {
    fn send_to_user(&self, userid: u64, packet: Packet) -> Result<(), ServerError>;
}

/// Binds one authenticated user to (at most) one game object
///
/// The zone keeps controls alongside the objects they drive and uses them to
/// push position updates back to the owning user. The sink is held weakly so
/// a control outliving its listening socket simply stops delivering.
#[derive(Debug)]
pub struct Control {
    userid: u64,
    access: u64,
    object_id: AtomicU64,
    sink: Weak<dyn PacketSink>,
}

impl Control {
    pub fn new(userid: u64, access: u64, sink: Weak<dyn PacketSink>) -> Self {
        Self {
            userid,
            access,
            object_id: AtomicU64::new(0),
            sink,
        }
    }

    pub fn userid(&self) -> u64 {
        self.userid
    }

    pub fn access(&self) -> u64 {
        self.access
    }

    /// Bound object, if any
    pub fn object_id(&self) -> Option<u64> {
        match self.object_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn bind(&self, object_id: u64) {
        self.object_id.store(object_id, Ordering::SeqCst);
    }

    pub fn unbind(&self) -> Option<u64> {
        match self.object_id.swap(0, Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn send(&self, packet: Packet) -> Result<(), ServerError> {
        match self.sink.upgrade() {
            Some(sink) => sink.send_to_user(self.userid, packet),
            None => {
                debug!("Control for user {} has no sink", self.userid);
                Ok(())
            }
        }
    }
}
