//! Account and world persistence
//!
//! The session engine only ever talks to the [`Database`] trait. Backends are
//! picked by name from a static registry at startup; the built-in `memory`
//! backend serves everything from the `[database]` tables of the server
//! configuration.

use crate::config::DatabaseConfig;
use crate::error::ServerError;
use log::{debug, info, warn};
use shared::proto::ACCESS_NONE;
use std::collections::HashMap;
use std::sync::Arc;

/// Static description of a world object loaded at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub object_id: u64,
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub skill_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSkill {
    pub skill_id: u64,
    pub level: u32,
}

pub trait Database: Send + Sync {
    /// Returns the userid owning `username` + `pubkey`, or 0 when there is none
    fn check_authentication(&self, username: &str, pubkey: &[u8]) -> Result<u64, ServerError>;

    /// Access level `userid` holds over the character `charname`
    fn check_authorization(&self, userid: u64, charname: &str) -> Result<u64, ServerError>;

    /// Object the character is embodied in, or 0
    fn get_character_objectid(&self, userid: u64, charname: &str) -> Result<u64, ServerError>;

    fn get_server_skills(&self) -> Result<Vec<Skill>, ServerError>;

    fn get_server_objects(&self) -> Result<Vec<ObjectRecord>, ServerError>;

    fn get_player_server_skills(
        &self,
        userid: u64,
        charname: &str,
    ) -> Result<Vec<PlayerSkill>, ServerError>;
}

type Constructor = fn(&DatabaseConfig) -> Result<Arc<dyn Database>, ServerError>;

const BACKENDS: &[(&str, Constructor)] = &[("memory", MemoryDatabase::open)];

pub fn backend_names() -> Vec<&'static str> {
    BACKENDS.iter().map(|(name, _)| *name).collect()
}

/// Opens the backend named in the configuration
pub fn open_database(config: &DatabaseConfig) -> Result<Arc<dyn Database>, ServerError> {
    let constructor = BACKENDS
        .iter()
        .find(|(name, _)| *name == config.backend)
        .map(|(_, constructor)| *constructor)
        .ok_or_else(|| {
            ServerError::Database(format!(
                "unknown backend '{}' (available: {})",
                config.backend,
                backend_names().join(", ")
            ))
        })?;
    let database = constructor(config)?;
    info!("Opened {} database", config.backend);
    Ok(database)
}

#[derive(Debug, Clone)]
struct Account {
    userid: u64,
    pubkey: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Character {
    object_id: u64,
    access: u64,
}

/// Read-only database built from configuration tables
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    accounts: HashMap<String, Account>,
    characters: HashMap<(u64, String), Character>,
    objects: Vec<ObjectRecord>,
    skills: Vec<Skill>,
    player_skills: HashMap<(u64, String), Vec<PlayerSkill>>,
}

impl MemoryDatabase {
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ServerError> {
        let mut db = MemoryDatabase::default();

        for user in &config.users {
            if user.userid == 0 {
                return Err(ServerError::Database(format!(
                    "user '{}' has reserved userid 0",
                    user.username
                )));
            }
            let pubkey = hex::decode(user.pubkey.trim()).map_err(|e| {
                ServerError::Database(format!("bad public key for '{}': {}", user.username, e))
            })?;
            db.accounts.insert(
                user.username.clone(),
                Account {
                    userid: user.userid,
                    pubkey,
                },
            );
        }

        for character in &config.characters {
            db.characters.insert(
                (character.userid, character.charname.clone()),
                Character {
                    object_id: character.object_id,
                    access: character.access,
                },
            );
        }

        db.objects = config
            .objects
            .iter()
            .map(|object| ObjectRecord {
                object_id: object.object_id,
                position: object.position,
                orientation: object.orientation,
            })
            .collect();

        for skill in &config.skills {
            db.skills.push(Skill {
                skill_id: skill.skill_id,
                name: skill.name.clone(),
            });
            for holder in &skill.holders {
                db.player_skills
                    .entry((holder.userid, holder.charname.clone()))
                    .or_default()
                    .push(PlayerSkill {
                        skill_id: skill.skill_id,
                        level: holder.level,
                    });
            }
        }

        debug!(
            "Memory database: {} accounts, {} characters, {} objects, {} skills",
            db.accounts.len(),
            db.characters.len(),
            db.objects.len(),
            db.skills.len()
        );
        Ok(db)
    }

    fn open(config: &DatabaseConfig) -> Result<Arc<dyn Database>, ServerError> {
        Ok(Arc::new(Self::from_config(config)?))
    }
}

impl Database for MemoryDatabase {
    fn check_authentication(&self, username: &str, pubkey: &[u8]) -> Result<u64, ServerError> {
        match self.accounts.get(username) {
            Some(account) if account.pubkey == pubkey => Ok(account.userid),
            Some(_) => {
                warn!("Public key mismatch for user '{}'", username);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    fn check_authorization(&self, userid: u64, charname: &str) -> Result<u64, ServerError> {
        Ok(self
            .characters
            .get(&(userid, charname.to_string()))
            .map(|character| character.access)
            .unwrap_or(ACCESS_NONE))
    }

    fn get_character_objectid(&self, userid: u64, charname: &str) -> Result<u64, ServerError> {
        Ok(self
            .characters
            .get(&(userid, charname.to_string()))
            .map(|character| character.object_id)
            .unwrap_or(0))
    }

    fn get_server_skills(&self) -> Result<Vec<Skill>, ServerError> {
        Ok(self.skills.clone())
    }

    fn get_server_objects(&self) -> Result<Vec<ObjectRecord>, ServerError> {
        Ok(self.objects.clone())
    }

    fn get_player_server_skills(
        &self,
        userid: u64,
        charname: &str,
    ) -> Result<Vec<PlayerSkill>, ServerError> {
        Ok(self
            .player_skills
            .get(&(userid, charname.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CharacterEntry, ObjectEntry, SkillEntry, SkillHolder, UserEntry};
    use shared::proto::ACCESS_MOVE;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            backend: "memory".to_string(),
            users: vec![UserEntry {
                userid: 7,
                username: "alice".to_string(),
                pubkey: "0a0b0c".to_string(),
            }],
            characters: vec![CharacterEntry {
                userid: 7,
                charname: "alice".to_string(),
                object_id: 100,
                access: ACCESS_MOVE,
            }],
            objects: vec![ObjectEntry {
                object_id: 100,
                position: [1.0, 2.0, 3.0],
                orientation: [1.0, 0.0, 0.0, 0.0],
            }],
            skills: vec![SkillEntry {
                skill_id: 1,
                name: "walk".to_string(),
                holders: vec![SkillHolder {
                    userid: 7,
                    charname: "alice".to_string(),
                    level: 5,
                }],
            }],
        }
    }

    #[test]
    fn test_authentication() {
        let db = MemoryDatabase::from_config(&config()).unwrap();
        assert_eq!(db.check_authentication("alice", &[0x0a, 0x0b, 0x0c]).unwrap(), 7);
        assert_eq!(db.check_authentication("alice", &[0x0a]).unwrap(), 0);
        assert_eq!(db.check_authentication("bob", &[0x0a, 0x0b, 0x0c]).unwrap(), 0);
    }

    #[test]
    fn test_authorization_and_object() {
        let db = MemoryDatabase::from_config(&config()).unwrap();
        assert_eq!(db.check_authorization(7, "alice").unwrap(), ACCESS_MOVE);
        assert_eq!(db.check_authorization(7, "mallory").unwrap(), ACCESS_NONE);
        assert_eq!(db.get_character_objectid(7, "alice").unwrap(), 100);
        assert_eq!(db.get_character_objectid(8, "alice").unwrap(), 0);
    }

    #[test]
    fn test_world_bootstrap_tables() {
        let db = MemoryDatabase::from_config(&config()).unwrap();
        assert_eq!(db.get_server_objects().unwrap()[0].object_id, 100);
        assert_eq!(db.get_server_skills().unwrap()[0].name, "walk");
        assert_eq!(
            db.get_player_server_skills(7, "alice").unwrap(),
            vec![PlayerSkill {
                skill_id: 1,
                level: 5
            }]
        );
        assert!(db.get_player_server_skills(7, "bob").unwrap().is_empty());
    }

    #[test]
    fn test_registry() {
        assert!(open_database(&config()).is_ok());

        let mut unknown = config();
        unknown.backend = "postgres".to_string();
        assert!(open_database(&unknown).is_err());
        assert_eq!(backend_names(), vec!["memory"]);
    }

    #[test]
    fn test_rejects_bad_key_hex() {
        let mut bad = config();
        bad.users[0].pubkey = "not hex".to_string();
        assert!(MemoryDatabase::from_config(&bad).is_err());
    }
}
