//! Inbound packet routing
//!
//! Each packet type the client understands maps to one handler. Types with
//! no entry (requests that only ever travel client to server, or tags the
//! client has never heard of) are logged and dropped.

use crate::comm::{response_label, Shared};
use crate::error::CommError;
use log::{debug, info, warn};
use shared::proto::{
    access_name, type_name, ACKPKT, LOGREQ, OBJDEL, PNGPKT, POSUPD, SRVKEY, SRVNOT,
};
use shared::{Packet, SessionCipher};
use std::sync::atomic::Ordering;
use std::sync::PoisonError;

type Handler = fn(&Shared, Packet) -> Result<(), CommError>;

const TABLE_SIZE: usize = 9;

pub(crate) struct Dispatcher {
    handlers: [Option<Handler>; TABLE_SIZE],
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        let mut handlers: [Option<Handler>; TABLE_SIZE] = [None; TABLE_SIZE];
        handlers[ACKPKT as usize] = Some(handle_ack);
        handlers[POSUPD as usize] = Some(handle_position);
        handlers[SRVNOT as usize] = Some(handle_notice);
        handlers[PNGPKT as usize] = Some(handle_ping);
        handlers[SRVKEY as usize] = Some(handle_server_key);
        handlers[OBJDEL as usize] = Some(handle_object_delete);
        Self { handlers }
    }

    pub(crate) fn dispatch(&self, shared: &Shared, packet: Packet) {
        let kind = packet.kind();
        let handler = match self.handlers.get(kind as usize).copied().flatten() {
            Some(handler) => handler,
            None => {
                warn!("Unsupported packet type {} ({})", kind, type_name(kind));
                shared.stats.count_dropped();
                return;
            }
        };

        shared.stats.count_dispatched();
        if let Err(e) = handler(shared, packet) {
            warn!("Error handling {} packet: {}", type_name(kind), e);
        }
    }
}

fn handle_ping(shared: &Shared, _packet: Packet) -> Result<(), CommError> {
    shared.enqueue(Packet::ack(PNGPKT, [0; 4]))
}

fn handle_ack(shared: &Shared, packet: Packet) -> Result<(), CommError> {
    let Packet::Ack(ack) = packet else {
        return Ok(());
    };

    if let Some(label) = response_label(ack.request) {
        let level = ack.misc[0];
        info!("{} response, access {}", label, access_name(level));
        if ack.request == LOGREQ {
            shared.access.store(level, Ordering::SeqCst);
            shared.object.store(ack.misc[1], Ordering::SeqCst);
            if ack.misc[1] != 0 {
                info!("Controlling object {}", ack.misc[1]);
            }
        }
    } else {
        debug!("Ack for {} request", type_name(ack.request));
    }
    Ok(())
}

fn handle_position(shared: &Shared, packet: Packet) -> Result<(), CommError> {
    if let Packet::Position(update) = packet {
        shared.cache.update_object(
            update.object_id,
            update.frame_number,
            update.position(),
            update.orientation(),
            update.look(),
        );
    }
    Ok(())
}

fn handle_notice(_shared: &Shared, packet: Packet) -> Result<(), CommError> {
    if let Packet::Notice(notice) = packet {
        info!(
            "Server notice: proto {} {}:{} direction {}",
            notice.ipproto,
            notice.addr(),
            notice.port,
            notice.direction
        );
    }
    Ok(())
}

fn handle_server_key(shared: &Shared, packet: Packet) -> Result<(), CommError> {
    let Packet::ServerKey(key) = packet else {
        return Ok(());
    };

    let Some(der) = key.pubkey_der() else {
        warn!("Server key packet carries no usable public key");
        return Ok(());
    };

    // Nothing is touched unless the whole derivation succeeds
    let cipher = SessionCipher::establish(&shared.identity, der, key.iv)?;
    let mut session = shared
        .session
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if session.replace(cipher).is_some() {
        info!("Session key replaced");
    } else {
        info!("Session established");
    }
    Ok(())
}

fn handle_object_delete(shared: &Shared, packet: Packet) -> Result<(), CommError> {
    if let Packet::ObjectDelete(delete) = packet {
        shared.cache.delete_object(delete.object_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::proto::{ACTREQ, LGTREQ};

    #[test]
    fn test_table_covers_server_bound_types_only() {
        let dispatcher = Dispatcher::new();
        for kind in [ACKPKT, POSUPD, SRVNOT, PNGPKT, SRVKEY, OBJDEL] {
            assert!(dispatcher.handlers[kind as usize].is_some(), "{}", kind);
        }
        for kind in [LOGREQ, ACTREQ, LGTREQ] {
            assert!(dispatcher.handlers[kind as usize].is_none(), "{}", kind);
        }
    }
}
