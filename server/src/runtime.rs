//! Startup wiring: world bootstrap and transport selection

use crate::actions::{load_modules, ActionModule, ActionRegistry};
use crate::config::{ServerConfig, TransportKind};
use crate::database::{open_database, Database};
use crate::error::ServerError;
use crate::listen::{ListenSocket, ServerStats};
use crate::tcp::TcpServer;
use crate::udp::UdpServer;
use crate::zone::Zone;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

/// Database, action modules and the running zone
pub struct World {
    database: Arc<dyn Database>,
    actions: Arc<ActionRegistry>,
    modules: Vec<Box<dyn ActionModule>>,
    zone: Arc<Zone>,
}

impl World {
    /// Opens the configured database backend and loads the world from it
    pub fn bootstrap(config: &ServerConfig) -> Result<Self, ServerError> {
        let database = open_database(&config.database)?;
        Self::with_database(config, database)
    }

    pub fn with_database(
        config: &ServerConfig,
        database: Arc<dyn Database>,
    ) -> Result<Self, ServerError> {
        let actions = Arc::new(ActionRegistry::new());
        let modules = load_modules(&config.zone.action_modules, &actions)?;

        let zone = Zone::new(&config.zone, &config.pools, Arc::clone(&actions))?;
        let objects = database.get_server_objects()?;
        zone.load_objects(&objects);
        let skills = database.get_server_skills()?;
        zone.start()?;

        info!(
            "World loaded: {} objects, {} skills, {} actions",
            zone.object_count(),
            skills.len(),
            actions.len()
        );
        Ok(Self {
            database,
            actions,
            modules,
            zone,
        })
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn zone(&self) -> &Arc<Zone> {
        &self.zone
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.zone.shutdown();
        for module in self.modules.drain(..).rev() {
            module.unregister(&self.actions);
        }
    }
}

/// A listening server on whichever transport the configuration names
pub enum Server {
    Udp(UdpServer),
    Tcp(TcpServer),
}

impl Server {
    pub fn start(config: &ServerConfig, world: &World) -> Result<Self, ServerError> {
        let database = Arc::clone(world.database());
        let zone = Arc::clone(world.zone());
        match config.listen.transport {
            TransportKind::Udp => UdpServer::bind(config, database, zone).map(Server::Udp),
            TransportKind::Tcp => TcpServer::bind(config, database, zone).map(Server::Tcp),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        match self {
            Server::Udp(server) => server.local_addr(),
            Server::Tcp(server) => server.local_addr(),
        }
    }

    pub fn listen(&self) -> &Arc<ListenSocket> {
        match self {
            Server::Udp(server) => server.listen(),
            Server::Tcp(server) => server.listen(),
        }
    }

    pub fn stats(&self) -> ServerStats {
        self.listen().stats()
    }

    pub fn shutdown(&mut self) {
        match self {
            Server::Udp(server) => server.shutdown(),
            Server::Tcp(server) => server.shutdown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectEntry;

    fn config(transport: TransportKind) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.listen.address = "127.0.0.1:0".into();
        config.listen.transport = transport;
        config.database.objects = vec![ObjectEntry {
            object_id: 1,
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
        }];
        config
    }

    #[test]
    fn test_bootstrap_loads_world() {
        let world = World::bootstrap(&config(TransportKind::Udp)).unwrap();
        assert_eq!(world.zone().object_count(), 1);
        assert_eq!(world.actions().lookup("move_to"), Some(1));
    }

    #[test]
    fn test_drop_unregisters_modules() {
        let world = World::bootstrap(&config(TransportKind::Udp)).unwrap();
        let actions = Arc::clone(&world.actions);
        drop(world);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_start_each_transport() {
        for transport in [TransportKind::Udp, TransportKind::Tcp] {
            let config = config(transport);
            let world = World::bootstrap(&config).unwrap();
            let mut server = Server::start(&config, &world).unwrap();

            assert_ne!(server.local_addr().port(), 0);
            assert_eq!(server.stats(), ServerStats::default());
            server.shutdown();
            assert!(!server.listen().is_running());
        }
    }

    #[test]
    fn test_unknown_backend_fails() {
        let mut config = config(TransportKind::Udp);
        config.database.backend = "ldap".into();
        assert!(World::bootstrap(&config).is_err());
    }
}
