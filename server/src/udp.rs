//! Datagram listener: one socket, one receive thread

use crate::config::ServerConfig;
use crate::database::Database;
use crate::error::ServerError;
use crate::listen::{ListenSocket, Transport};
use crate::user::Peer;
use crate::zone::Zone;
use log::{error, info, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Sends frames as single datagrams
pub struct UdpTransport {
    socket: UdpSocket,
}

impl Transport for UdpTransport {
    fn send_frame(&self, peer: &Peer, frame: &[u8]) -> Result<(), ServerError> {
        match peer {
            Peer::Datagram(addr) => {
                self.socket.send_to(frame, addr)?;
                Ok(())
            }
            Peer::Stream(_) => Err(ServerError::PeerGone(peer.to_string())),
        }
    }
}

pub struct UdpServer {
    listen: Arc<ListenSocket>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl UdpServer {
    pub fn bind(
        config: &ServerConfig,
        database: Arc<dyn Database>,
        zone: Arc<Zone>,
    ) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(&config.listen.address).map_err(|source| ServerError::Bind {
            addr: config.listen.address.clone(),
            source,
        })?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        info!("Server listening on {} (udp)", local_addr);

        let transport = Arc::new(UdpTransport {
            socket: socket.try_clone()?,
        });
        let listen = ListenSocket::new(config, transport, database, zone)?;
        listen.start()?;

        let running = Arc::new(AtomicBool::new(true));
        let receiver = thread::Builder::new()
            .name("udp-recv".into())
            .spawn({
                let listen = Arc::clone(&listen);
                let running = Arc::clone(&running);
                move || receive_loop(socket, listen, running)
            })
            .map_err(|source| ServerError::Spawn {
                name: "udp receiver".into(),
                source,
            })?;

        Ok(Self {
            listen,
            local_addr,
            running,
            receiver: Some(receiver),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listen(&self) -> &Arc<ListenSocket> {
        &self.listen
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.take() {
            if handle.join().is_err() {
                error!("UDP receiver panicked");
            }
        }
        self.listen.shutdown();
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(socket: UdpSocket, listen: Arc<ListenSocket>, running: Arc<AtomicBool>) {
    let mut buffer = [0u8; 2048];

    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buffer) {
            Ok((len, addr)) => listen.handle_frame(Peer::Datagram(addr), &buffer[..len]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            // ICMP port unreachable from a vanished client surfaces here on some platforms
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
            Err(e) => {
                warn!("Error receiving packet: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
    info!("UDP receiver stopped");
}
