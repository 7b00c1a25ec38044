//! Idle user sweep
//!
//! Runs on its own thread at `timeouts.reaper_interval_ms`. Users silent past
//! the link-dead timeout are torn down: their object is released, the
//! transport forgets the peer and the record leaves the table. Users silent
//! past the ping timeout are pinged so a live client has a reason to answer.

use crate::error::ServerError;
use crate::listen::ListenSocket;
use crate::user::BaseUser;
use log::{debug, info};
use shared::Packet;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What one sweep did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub reaped: Vec<u64>,
    pub pinged: Vec<u64>,
}

pub fn reap_once(listen: &ListenSocket, now: Instant) -> ReapReport {
    let timeouts = listen.timeouts();
    let link_dead = timeouts.link_dead_timeout();
    let ping = timeouts.ping_timeout();
    let mut report = ReapReport::default();

    for user in listen.users().snapshot() {
        if user.is_timed_out(link_dead, now) {
            teardown(listen, &user, now);
            report.reaped.push(user.userid());
        } else if user.is_timed_out(ping, now) && !user.pending_logout() {
            match listen.send_packets(&user, vec![Packet::ping()]) {
                Ok(()) => {
                    listen.count_ping();
                    report.pinged.push(user.userid());
                }
                Err(e) => debug!("Ping to user {} not queued: {}", user.userid(), e),
            }
        }
    }
    report
}

fn teardown(listen: &ListenSocket, user: &BaseUser, now: Instant) {
    if let Some(object_id) = user.take_control().and_then(|control| control.object_id()) {
        listen.zone().disconnect_game_object(object_id);
    }
    listen.transport().close_peer(&user.peer());
    listen.users().remove(user.userid());
    listen.count_reaped();
    info!(
        "Reaped user {} after {:?} of silence",
        user.userid(),
        user.idle_for(now)
    );
}

pub(crate) fn spawn(
    listen: Weak<ListenSocket>,
    interval: Duration,
) -> Result<JoinHandle<()>, ServerError> {
    thread::Builder::new()
        .name("reaper".into())
        .spawn(move || loop {
            thread::sleep(interval);
            let Some(listen) = listen.upgrade() else {
                break;
            };
            if !listen.is_running() {
                break;
            }
            let report = reap_once(&listen, Instant::now());
            if !report.reaped.is_empty() || !report.pinged.is_empty() {
                debug!(
                    "Reaper: {} reaped, {} pinged",
                    report.reaped.len(),
                    report.pinged.len()
                );
            }
        })
        .map_err(|source| ServerError::Spawn {
            name: "reaper".into(),
            source,
        })
}
