//! Action routines players can trigger with ACTREQ
//!
//! Routines live in an [`ActionRegistry`] keyed by the `action_id` carried on
//! the wire. Modules add and remove groups of routines; which modules load
//! is decided by name from the server configuration.

use crate::error::ServerError;
use crate::zone::Zone;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Routine ran and did what was asked
pub const ACTION_SUCCESS: u64 = 0;
/// Request refused before running: unknown id, bad intensity or no permission
pub const ACTION_REJECTED: u64 = 1;
/// Routine ran and failed
pub const ACTION_FAILED: u64 = 2;

/// Top speed of an object moved at full intensity, metres per second
pub const MAX_SPEED: f64 = 5.0;

/// Arguments every routine receives
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionArgs {
    pub source: u64,
    pub intensity: u8,
    /// Target object, 0 when the action aims at a point
    pub target: u64,
    /// Destination point or direction in metres
    pub direction: [f64; 3],
}

pub type ActionFn = fn(&Zone, &ActionArgs) -> Result<u64, ServerError>;

#[derive(Clone, Copy)]
pub struct ActionRoutine {
    pub name: &'static str,
    pub func: ActionFn,
    pub min_intensity: u8,
    pub max_intensity: u8,
}

impl ActionRoutine {
    pub fn accepts(&self, intensity: u8) -> bool {
        (self.min_intensity..=self.max_intensity).contains(&intensity)
    }
}

impl std::fmt::Debug for ActionRoutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRoutine")
            .field("name", &self.name)
            .field("min_intensity", &self.min_intensity)
            .field("max_intensity", &self.max_intensity)
            .finish()
    }
}

#[derive(Debug)]
struct Routines {
    by_id: BTreeMap<u16, ActionRoutine>,
    next_id: u16,
}

#[derive(Debug)]
pub struct ActionRegistry {
    routines: RwLock<Routines>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// Ids start at 1; 0 never names a routine
    pub fn new() -> Self {
        Self {
            routines: RwLock::new(Routines {
                by_id: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn register(&self, routine: ActionRoutine) -> Result<u16, ServerError> {
        let mut routines = self
            .routines
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if routines.by_id.values().any(|r| r.name == routine.name) {
            return Err(ServerError::Config(format!(
                "action '{}' is already registered",
                routine.name
            )));
        }

        let id = routines.next_id;
        routines.next_id = id
            .checked_add(1)
            .ok_or_else(|| ServerError::Config("action ids exhausted".into()))?;
        routines.by_id.insert(id, routine);
        debug!("Registered action {} as id {}", routine.name, id);
        Ok(id)
    }

    pub fn unregister(&self, name: &str) -> Option<u16> {
        let mut routines = self
            .routines
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = routines
            .by_id
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(id, _)| *id)?;
        routines.by_id.remove(&id);
        Some(id)
    }

    pub fn get(&self, action_id: u16) -> Option<ActionRoutine> {
        self.routines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&action_id)
            .copied()
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.routines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.routines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A group of routines loaded and unloaded together
pub trait ActionModule: Send + Sync {
    fn name(&self) -> &'static str;
    fn register(&self, registry: &ActionRegistry) -> Result<(), ServerError>;
    fn unregister(&self, registry: &ActionRegistry);
}

type ModuleConstructor = fn() -> Box<dyn ActionModule>;

const MODULES: &[(&str, ModuleConstructor)] = &[("core", core_module)];

fn core_module() -> Box<dyn ActionModule> {
    Box::new(CoreActions)
}

/// Instantiates and registers each named module, in order
pub fn load_modules(
    names: &[String],
    registry: &ActionRegistry,
) -> Result<Vec<Box<dyn ActionModule>>, ServerError> {
    let mut loaded = Vec::with_capacity(names.len());
    for name in names {
        let constructor = MODULES
            .iter()
            .find(|(module, _)| *module == name.as_str())
            .map(|(_, constructor)| *constructor)
            .ok_or_else(|| ServerError::Config(format!("unknown action module '{}'", name)))?;
        let module = constructor();
        module.register(registry)?;
        info!("Loaded action module {}", module.name());
        loaded.push(module);
    }
    Ok(loaded)
}

/// Built-in movement routines
pub struct CoreActions;

const CORE_ROUTINES: [ActionRoutine; 3] = [
    ActionRoutine {
        name: "move_to",
        func: move_to,
        min_intensity: 1,
        max_intensity: 100,
    },
    ActionRoutine {
        name: "stop",
        func: stop,
        min_intensity: 0,
        max_intensity: u8::MAX,
    },
    ActionRoutine {
        name: "look_at",
        func: look_at,
        min_intensity: 0,
        max_intensity: u8::MAX,
    },
];

impl ActionModule for CoreActions {
    fn name(&self) -> &'static str {
        "core"
    }

    fn register(&self, registry: &ActionRegistry) -> Result<(), ServerError> {
        for routine in CORE_ROUTINES {
            registry.register(routine)?;
        }
        Ok(())
    }

    fn unregister(&self, registry: &ActionRegistry) {
        for routine in CORE_ROUTINES {
            registry.unregister(routine.name);
        }
    }
}

/// Where an action aims: the target object when one is given, else the point
fn aim_point(zone: &Zone, args: &ActionArgs) -> Result<[f64; 3], ServerError> {
    if args.target == 0 {
        return Ok(args.direction);
    }
    zone.object(args.target)
        .map(|object| object.position)
        .ok_or_else(|| ServerError::Zone(format!("no object {}", args.target)))
}

fn move_to(zone: &Zone, args: &ActionArgs) -> Result<u64, ServerError> {
    let dest = aim_point(zone, args)?;
    let speed = MAX_SPEED * f64::from(args.intensity) / 100.0;
    zone.set_course(args.source, dest, speed)?;
    Ok(ACTION_SUCCESS)
}

fn stop(zone: &Zone, args: &ActionArgs) -> Result<u64, ServerError> {
    zone.stop(args.source)?;
    Ok(ACTION_SUCCESS)
}

fn look_at(zone: &Zone, args: &ActionArgs) -> Result<u64, ServerError> {
    let point = aim_point(zone, args)?;
    zone.look_at(args.source, point)?;
    Ok(ACTION_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_zone: &Zone, _args: &ActionArgs) -> Result<u64, ServerError> {
        Ok(ACTION_SUCCESS)
    }

    #[test]
    fn test_core_ids_follow_registration_order() {
        let registry = ActionRegistry::new();
        let modules = load_modules(&["core".to_string()], &registry).unwrap();

        assert_eq!(modules.len(), 1);
        assert_eq!(registry.lookup("move_to"), Some(1));
        assert_eq!(registry.lookup("stop"), Some(2));
        assert_eq!(registry.lookup("look_at"), Some(3));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unknown_module() {
        let registry = ActionRegistry::new();
        assert!(load_modules(&["perl".to_string()], &registry).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = ActionRegistry::new();
        let routine = ActionRoutine {
            name: "wave",
            func: noop,
            min_intensity: 0,
            max_intensity: 10,
        };
        assert_eq!(registry.register(routine).unwrap(), 1);
        assert!(registry.register(routine).is_err());
    }

    #[test]
    fn test_unregister_module() {
        let registry = ActionRegistry::new();
        let modules = load_modules(&["core".to_string()], &registry).unwrap();
        modules[0].unregister(&registry);

        assert!(registry.is_empty());
        assert!(registry.get(1).is_none());

        // Ids are never reused
        load_modules(&["core".to_string()], &registry).unwrap();
        assert_eq!(registry.lookup("move_to"), Some(4));
    }

    #[test]
    fn test_intensity_bounds() {
        let registry = ActionRegistry::new();
        load_modules(&["core".to_string()], &registry).unwrap();
        let move_to = registry.get(1).unwrap();

        assert!(!move_to.accepts(0));
        assert!(move_to.accepts(1));
        assert!(move_to.accepts(100));
        assert!(!move_to.accepts(101));
        assert!(registry.get(2).unwrap().accepts(255));
    }
}
