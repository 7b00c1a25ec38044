//! Server configuration
//!
//! Every field has a default, so an empty (or absent) file yields a working
//! UDP server on port 4500 with an empty in-memory database.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub timeouts: TimeoutConfig,
    pub pools: PoolsConfig,
    pub zone: ZoneConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub address: String,
    pub transport: TransportKind,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:4500".to_string(),
            transport: TransportKind::Udp,
        }
    }
}

/// Liveness thresholds, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub reaper_interval_ms: u64,
    /// Silence after which the reaper starts pinging a user
    pub ping_timeout_ms: u64,
    /// Silence after which a user is torn down
    pub link_dead_timeout_ms: u64,
    /// Time a stream connection gets to log in before it is closed
    pub login_timeout_ms: u64,
    /// Longest a single stream write may block
    pub write_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reaper_interval_ms: 1_000,
            ping_timeout_ms: 10_000,
            link_dead_timeout_ms: 30_000,
            login_timeout_ms: 10_000,
            write_timeout_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn link_dead_timeout(&self) -> Duration {
        Duration::from_millis(self.link_dead_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
    pub capacity: usize,
}

impl PoolConfig {
    pub const fn new(workers: usize, capacity: usize) -> Self {
        Self { workers, capacity }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    pub access: PoolConfig,
    pub send: PoolConfig,
    pub action: PoolConfig,
    pub motion: PoolConfig,
    pub update: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            access: PoolConfig::new(2, 64),
            send: PoolConfig::new(1, 1024),
            action: PoolConfig::new(4, 256),
            motion: PoolConfig::new(2, 256),
            update: PoolConfig::new(2, 256),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub motion_interval_ms: u64,
    /// Position updates reach every controlled object within this many metres
    pub update_radius: f64,
    pub action_modules: Vec<String>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            motion_interval_ms: 100,
            update_radius: 100.0,
            action_modules: vec!["core".to_string()],
        }
    }
}

impl ZoneConfig {
    pub fn motion_interval(&self) -> Duration {
        Duration::from_millis(self.motion_interval_ms)
    }
}

/// Backend selection plus the tables the `memory` backend serves from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: String,
    pub users: Vec<UserEntry>,
    pub characters: Vec<CharacterEntry>,
    pub objects: Vec<ObjectEntry>,
    pub skills: Vec<SkillEntry>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            users: Vec::new(),
            characters: Vec::new(),
            objects: Vec::new(),
            skills: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub userid: u64,
    pub username: String,
    /// Hex of the DER encoded public key the user logs in with
    pub pubkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterEntry {
    pub userid: u64,
    pub charname: String,
    pub object_id: u64,
    pub access: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub object_id: u64,
    #[serde(default)]
    pub position: [f64; 3],
    #[serde(default = "identity_orientation")]
    pub orientation: [f64; 4],
}

fn identity_orientation() -> [f64; 4] {
    [1.0, 0.0, 0.0, 0.0]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub skill_id: u64,
    pub name: String,
    /// Characters holding the skill, as `userid` / `charname` pairs
    #[serde(default)]
    pub holders: Vec<SkillHolder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillHolder {
    pub userid: u64,
    pub charname: String,
    #[serde(default)]
    pub level: u32,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ServerError> {
        let config: ServerConfig =
            toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        let pools = [
            ("access", self.pools.access),
            ("send", self.pools.send),
            ("action", self.pools.action),
            ("motion", self.pools.motion),
            ("update", self.pools.update),
        ];
        for (name, pool) in pools {
            if pool.workers == 0 || pool.capacity == 0 {
                return Err(ServerError::Config(format!(
                    "{} pool needs at least one worker and one queue slot",
                    name
                )));
            }
        }

        // Per-user packet order holds only with a single sender
        if self.pools.send.workers != 1 {
            return Err(ServerError::Config(format!(
                "send pool must have exactly one worker, got {}",
                self.pools.send.workers
            )));
        }

        let t = &self.timeouts;
        if t.reaper_interval_ms == 0
            || t.login_timeout_ms == 0
            || t.write_timeout_ms == 0
            || self.zone.motion_interval_ms == 0
        {
            return Err(ServerError::Config("intervals must be non-zero".into()));
        }
        if t.ping_timeout_ms >= t.link_dead_timeout_ms {
            return Err(ServerError::Config(format!(
                "ping timeout ({} ms) must be shorter than link-dead timeout ({} ms)",
                t.ping_timeout_ms, t.link_dead_timeout_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.transport, TransportKind::Udp);
        assert_eq!(config.timeouts.ping_timeout(), Duration::from_secs(10));
        assert_eq!(config.timeouts.link_dead_timeout(), Duration::from_secs(30));
        assert_eq!(config.timeouts.reaper_interval(), Duration::from_secs(1));
        assert_eq!(config.timeouts.login_timeout(), Duration::from_secs(10));
        assert_eq!(config.timeouts.write_timeout(), Duration::from_secs(2));
        assert_eq!(config.pools.access, PoolConfig::new(2, 64));
        assert_eq!(config.pools.send, PoolConfig::new(1, 1024));
        assert_eq!(config.zone.motion_interval(), Duration::from_millis(100));
        assert_eq!(config.zone.action_modules, vec!["core".to_string()]);
        assert_eq!(config.database.backend, "memory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.listen.address, "0.0.0.0:4500");
        assert_eq!(config.pools.update, PoolConfig::new(2, 256));
    }

    #[test]
    fn test_parse_full_file() {
        let text = r#"
            [listen]
            address = "127.0.0.1:5000"
            transport = "tcp"

            [timeouts]
            ping_timeout_ms = 2000
            link_dead_timeout_ms = 6000

            [pools.action]
            workers = 8
            capacity = 32

            [zone]
            update_radius = 25.0

            [[database.users]]
            userid = 7
            username = "alice"
            pubkey = "3059"

            [[database.characters]]
            userid = 7
            charname = "alice"
            object_id = 100
            access = 3

            [[database.objects]]
            object_id = 100
            position = [1.0, 2.0, 0.0]
        "#;

        let config = ServerConfig::from_toml(text).unwrap();
        assert_eq!(config.listen.transport, TransportKind::Tcp);
        assert_eq!(config.timeouts.ping_timeout_ms, 2000);
        assert_eq!(config.timeouts.reaper_interval_ms, 1000);
        assert_eq!(config.pools.action, PoolConfig::new(8, 32));
        assert_eq!(config.pools.send, PoolConfig::new(1, 1024));
        assert_eq!(config.zone.motion_interval_ms, 100);
        assert_eq!(config.database.users[0].username, "alice");
        assert_eq!(config.database.characters[0].object_id, 100);
        assert_eq!(config.database.objects[0].orientation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_inverted_timeouts() {
        let text = "[timeouts]\nping_timeout_ms = 5000\nlink_dead_timeout_ms = 5000\n";
        assert!(ServerConfig::from_toml(text).is_err());
    }

    #[test]
    fn test_rejects_empty_pool() {
        let text = "[pools.send]\nworkers = 0\ncapacity = 10\n";
        assert!(ServerConfig::from_toml(text).is_err());
    }

    #[test]
    fn test_rejects_parallel_send_pool() {
        let text = "[pools.send]\nworkers = 4\ncapacity = 1024\n";
        assert!(matches!(
            ServerConfig::from_toml(text),
            Err(ServerError::Config(message)) if message.contains("send pool")
        ));
    }

    #[test]
    fn test_rejects_unknown_transport() {
        assert!(ServerConfig::from_toml("[listen]\ntransport = \"sctp\"\n").is_err());
    }
}
