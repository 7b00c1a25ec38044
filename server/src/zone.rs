//! Game objects and the pools that drive them
//!
//! The zone owns every live object plus three worker pools:
//! - **action**: runs player action requests against the action registry
//! - **motion**: integrates one moving object per job
//! - **update**: fans a `POSUPD` for one object out to every control in range
//!
//! A ticker thread feeds the motion pool at a fixed interval. Objects bound to
//! a [`Control`] are visible; releasing the control hides the object and
//! tells nearby users it is gone.

use crate::actions::{ActionArgs, ActionRegistry, ACTION_FAILED, ACTION_REJECTED};
use crate::config::{PoolsConfig, ZoneConfig};
use crate::control::Control;
use crate::database::ObjectRecord;
use crate::error::ServerError;
use crate::pool::ThreadPool;
use log::{debug, info, warn};
use shared::proto::{
    ActionRequest, PositionUpdate, ACCESS_MODIFY, ACCESS_MOVE, ACTREQ, POSITION_SCALE,
};
use shared::Packet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Objects closer than this to their destination are considered arrived
const ARRIVAL_EPSILON: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct GameObject {
    pub object_id: u64,
    pub position: [f64; 3],
    pub orientation: [f64; 4],
    pub look: [f64; 3],
    /// Metres per second
    pub velocity: [f64; 3],
    pub destination: Option<[f64; 3]>,
    pub visible: bool,
    pub frame: u16,
    controller: Option<Arc<Control>>,
}

impl GameObject {
    pub fn new(record: &ObjectRecord) -> Self {
        Self {
            object_id: record.object_id,
            position: record.position,
            orientation: record.orientation,
            look: [1.0, 0.0, 0.0],
            velocity: [0.0; 3],
            destination: None,
            visible: false,
            frame: 0,
            controller: None,
        }
    }

    pub fn controller(&self) -> Option<&Arc<Control>> {
        self.controller.as_ref()
    }

    pub fn is_moving(&self) -> bool {
        self.velocity.iter().any(|v| *v != 0.0)
    }

    fn halt(&mut self) {
        self.velocity = [0.0; 3];
        self.destination = None;
    }

    /// Advances the object by `dt` seconds; returns whether it moved
    fn integrate(&mut self, dt: f64) -> bool {
        if !self.is_moving() {
            return false;
        }

        match self.destination {
            Some(dest) if distance(self.position, dest) <= speed(self.velocity) * dt => {
                self.position = dest;
                self.halt();
            }
            _ => {
                for axis in 0..3 {
                    self.position[axis] += self.velocity[axis] * dt;
                }
            }
        }
        self.frame = self.frame.wrapping_add(1);
        true
    }

    pub fn to_update(&self) -> Packet {
        Packet::Position(PositionUpdate::from_world(
            self.object_id,
            self.frame,
            self.position,
            self.orientation,
            self.look,
        ))
    }
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}

fn speed(v: [f64; 3]) -> f64 {
    distance(v, [0.0; 3])
}

/// Unit vector from `from` towards `to`, or `None` when they coincide
fn heading(from: [f64; 3], to: [f64; 3]) -> Option<[f64; 3]> {
    let length = distance(from, to);
    if length < ARRIVAL_EPSILON {
        return None;
    }
    Some([
        (to[0] - from[0]) / length,
        (to[1] - from[1]) / length,
        (to[2] - from[2]) / length,
    ])
}

pub struct ActionJob {
    pub control: Arc<Control>,
    pub request: ActionRequest,
}

struct MotionJob {
    object_id: u64,
    dt: f64,
}

pub struct Zone {
    objects: RwLock<HashMap<u64, GameObject>>,
    actions: Arc<ActionRegistry>,
    update_radius: f64,
    motion_interval: Duration,
    action_pool: OnceLock<ThreadPool<ActionJob>>,
    motion_pool: OnceLock<ThreadPool<MotionJob>>,
    update_pool: OnceLock<ThreadPool<u64>>,
    running: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Zone {
    pub fn new(
        config: &ZoneConfig,
        pools: &PoolsConfig,
        actions: Arc<ActionRegistry>,
    ) -> Result<Arc<Self>, ServerError> {
        let zone = Arc::new(Zone {
            objects: RwLock::new(HashMap::new()),
            actions,
            update_radius: config.update_radius,
            motion_interval: config.motion_interval(),
            action_pool: OnceLock::new(),
            motion_pool: OnceLock::new(),
            update_pool: OnceLock::new(),
            running: AtomicBool::new(false),
            ticker: Mutex::new(None),
        });

        let weak = Arc::downgrade(&zone);
        let action_pool = ThreadPool::new("action", pools.action, {
            let weak = weak.clone();
            move |job: ActionJob| with_zone(&weak, |zone| zone.run_action(job))
        })?;
        let motion_pool = ThreadPool::new("motion", pools.motion, {
            let weak = weak.clone();
            move |job: MotionJob| with_zone(&weak, |zone| zone.step_object(job.object_id, job.dt))
        })?;
        let update_pool = ThreadPool::new("update", pools.update, move |object_id: u64| {
            with_zone(&weak, |zone| zone.broadcast_update(object_id))
        })?;

        let _ = zone.action_pool.set(action_pool);
        let _ = zone.motion_pool.set(motion_pool);
        let _ = zone.update_pool.set(update_pool);
        Ok(zone)
    }

    /// Starts the motion ticker thread
    pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let weak = Arc::downgrade(self);
        let interval = self.motion_interval;
        let handle = thread::Builder::new()
            .name("motion-ticker".into())
            .spawn(move || loop {
                thread::sleep(interval);
                let Some(zone) = weak.upgrade() else { break };
                if !zone.running.load(Ordering::SeqCst) {
                    break;
                }
                zone.tick_motion(interval.as_secs_f64());
            })
            .map_err(|source| ServerError::Spawn {
                name: "motion ticker".into(),
                source,
            })?;

        *self.ticker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Zone started with {} objects", self.object_count());
        Ok(())
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Motion ticker panicked");
            }
        }
        if let Some(pool) = self.action_pool.get() {
            pool.shutdown();
        }
        if let Some(pool) = self.motion_pool.get() {
            pool.shutdown();
        }
        if let Some(pool) = self.update_pool.get() {
            pool.shutdown();
        }
    }

    pub fn load_objects(&self, records: &[ObjectRecord]) {
        let mut objects = self.write_objects();
        for record in records {
            objects.insert(record.object_id, GameObject::new(record));
        }
    }

    pub fn add_object(&self, record: &ObjectRecord) {
        self.write_objects()
            .insert(record.object_id, GameObject::new(record));
    }

    pub fn object(&self, object_id: u64) -> Option<GameObject> {
        self.read_objects().get(&object_id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.read_objects().len()
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Hands `object_id` to `control` and makes it visible
    ///
    /// Nothing is sent; call [`Zone::announce`] once the owner can receive.
    pub fn connect_game_object(
        &self,
        control: &Arc<Control>,
        object_id: u64,
    ) -> Result<(), ServerError> {
        {
            let mut objects = self.write_objects();
            let object = objects
                .get_mut(&object_id)
                .ok_or_else(|| ServerError::Zone(format!("no object {}", object_id)))?;

            if let Some(current) = &object.controller {
                if !Arc::ptr_eq(current, control) {
                    return Err(ServerError::Zone(format!(
                        "object {} is controlled by user {}",
                        object_id,
                        current.userid()
                    )));
                }
            }
            object.controller = Some(Arc::clone(control));
            object.visible = true;
        }

        control.bind(object_id);
        info!("User {} now controls object {}", control.userid(), object_id);
        Ok(())
    }

    /// Detaches the controller, hides the object and announces its removal
    pub fn disconnect_game_object(&self, object_id: u64) {
        let location = {
            let mut objects = self.write_objects();
            let Some(object) = objects.get_mut(&object_id) else {
                return;
            };
            if let Some(control) = object.controller.take() {
                control.unbind();
            }
            object.visible = false;
            object.halt();
            object.position
        };

        let delete = Packet::object_delete(object_id);
        for control in self.controls_near(location) {
            if let Err(e) = control.send(delete.clone()) {
                debug!("OBJDEL to user {} failed: {}", control.userid(), e);
            }
        }
        debug!("Object {} released", object_id);
    }

    pub fn submit_action(
        &self,
        control: Arc<Control>,
        request: ActionRequest,
    ) -> Result<(), ServerError> {
        pool(&self.action_pool, "action")?.push(ActionJob { control, request })
    }

    fn run_action(&self, job: ActionJob) -> Result<(), ServerError> {
        let ActionJob { control, request } = job;
        let result = self.execute_action(&control, &request);
        control.send(Packet::ack(
            ACTREQ,
            [result, u64::from(request.action_id), 0, 0],
        ))?;
        self.announce(request.object_id);
        Ok(())
    }

    /// Checks permissions and bounds, then runs the routine
    pub fn execute_action(&self, control: &Control, request: &ActionRequest) -> u64 {
        let Some(routine) = self.actions.get(request.action_id) else {
            warn!("User {} sent unknown action {}", control.userid(), request.action_id);
            return ACTION_REJECTED;
        };

        let owns = control.object_id() == Some(request.object_id);
        if control.access() < ACCESS_MOVE || (!owns && control.access() < ACCESS_MODIFY) {
            warn!(
                "User {} may not {} object {}",
                control.userid(),
                routine.name,
                request.object_id
            );
            return ACTION_REJECTED;
        }

        if !routine.accepts(request.power_level) {
            warn!(
                "Intensity {} out of bounds for {} ({}..={})",
                request.power_level, routine.name, routine.min_intensity, routine.max_intensity
            );
            return ACTION_REJECTED;
        }

        let args = ActionArgs {
            source: request.object_id,
            intensity: request.power_level,
            target: request.dest_object_id,
            direction: [
                request.x_pos_dest as f64 / POSITION_SCALE,
                request.y_pos_dest as f64 / POSITION_SCALE,
                request.z_pos_dest as f64 / POSITION_SCALE,
            ],
        };
        match (routine.func)(self, &args) {
            Ok(result) => {
                debug!("{} on object {} -> {}", routine.name, request.object_id, result);
                result
            }
            Err(e) => {
                warn!("{} on object {} failed: {}", routine.name, request.object_id, e);
                ACTION_FAILED
            }
        }
    }

    /// Sends the object towards `dest` at `speed` metres per second
    pub fn set_course(&self, object_id: u64, dest: [f64; 3], speed: f64) -> Result<(), ServerError> {
        self.with_object(object_id, |object| {
            match heading(object.position, dest) {
                Some(dir) => {
                    object.velocity = [dir[0] * speed, dir[1] * speed, dir[2] * speed];
                    object.destination = Some(dest);
                    object.look = dir;
                }
                None => object.halt(),
            }
        })
    }

    pub fn stop(&self, object_id: u64) -> Result<(), ServerError> {
        self.with_object(object_id, GameObject::halt)
    }

    /// Turns the object to face `point`
    pub fn look_at(&self, object_id: u64, point: [f64; 3]) -> Result<(), ServerError> {
        self.with_object(object_id, |object| {
            if let Some(dir) = heading(object.position, point) {
                object.look = dir;
                let yaw = dir[1].atan2(dir[0]);
                object.orientation = [(yaw / 2.0).cos(), 0.0, 0.0, (yaw / 2.0).sin()];
                object.frame = object.frame.wrapping_add(1);
            }
        })
    }

    fn with_object(
        &self,
        object_id: u64,
        f: impl FnOnce(&mut GameObject),
    ) -> Result<(), ServerError> {
        let mut objects = self.write_objects();
        let object = objects
            .get_mut(&object_id)
            .filter(|object| object.visible)
            .ok_or_else(|| ServerError::Zone(format!("no visible object {}", object_id)))?;
        f(object);
        Ok(())
    }

    /// Queues one motion job per moving object
    pub fn tick_motion(&self, dt: f64) {
        let moving: Vec<u64> = self
            .read_objects()
            .values()
            .filter(|object| object.visible && object.is_moving())
            .map(|object| object.object_id)
            .collect();

        let Ok(pool) = pool(&self.motion_pool, "motion") else {
            return;
        };
        for object_id in moving {
            if let Err(e) = pool.push(MotionJob { object_id, dt }) {
                warn!("Motion for object {} skipped: {}", object_id, e);
            }
        }
    }

    /// Integrates one object and queues its update if it moved
    pub fn step_object(&self, object_id: u64, dt: f64) -> Result<(), ServerError> {
        let moved = {
            let mut objects = self.write_objects();
            match objects.get_mut(&object_id) {
                Some(object) if object.visible => object.integrate(dt),
                _ => false,
            }
        };
        if moved {
            self.announce(object_id);
        }
        Ok(())
    }

    /// Queues a position update for `object_id` on the update pool
    pub fn announce(&self, object_id: u64) {
        match pool(&self.update_pool, "update") {
            Ok(pool) => {
                if let Err(e) = pool.push(object_id) {
                    warn!("Update for object {} skipped: {}", object_id, e);
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Sends the object's current state to every control within range
    pub fn broadcast_update(&self, object_id: u64) -> Result<(), ServerError> {
        let Some(object) = self.object(object_id).filter(|object| object.visible) else {
            return Ok(());
        };

        let update = object.to_update();
        for control in self.controls_near(object.position) {
            if let Err(e) = control.send(update.clone()) {
                debug!("POSUPD to user {} failed: {}", control.userid(), e);
            }
        }
        Ok(())
    }

    /// Controls of every visible object within the update radius of `point`
    pub fn controls_near(&self, point: [f64; 3]) -> Vec<Arc<Control>> {
        self.read_objects()
            .values()
            .filter(|object| {
                object.visible && distance(object.position, point) <= self.update_radius
            })
            .filter_map(|object| object.controller.clone())
            .collect()
    }

    fn read_objects(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, GameObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_objects(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, GameObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pool<'a, J: Send + 'static>(
    cell: &'a OnceLock<ThreadPool<J>>,
    name: &'static str,
) -> Result<&'a ThreadPool<J>, ServerError> {
    cell.get().ok_or(ServerError::PoolClosed(name))
}

fn with_zone(
    weak: &Weak<Zone>,
    f: impl FnOnce(&Zone) -> Result<(), ServerError>,
) -> Result<(), ServerError> {
    match weak.upgrade() {
        Some(zone) => f(&zone),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{load_modules, ACTION_SUCCESS};
    use crate::control::tests::recording_control;
    use assert_approx_eq::assert_approx_eq;
    use shared::proto::{ACCESS_VIEW, OBJDEL, POSUPD};
    use std::time::Instant;

    fn zone() -> Arc<Zone> {
        let registry = Arc::new(ActionRegistry::new());
        load_modules(&["core".to_string()], &registry).unwrap();
        let zone = Zone::new(&ZoneConfig::default(), &PoolsConfig::default(), registry).unwrap();
        zone.load_objects(&[
            ObjectRecord {
                object_id: 100,
                position: [0.0, 0.0, 0.0],
                orientation: [1.0, 0.0, 0.0, 0.0],
            },
            ObjectRecord {
                object_id: 200,
                position: [10.0, 0.0, 0.0],
                orientation: [1.0, 0.0, 0.0, 0.0],
            },
            ObjectRecord {
                object_id: 300,
                position: [500.0, 0.0, 0.0],
                orientation: [1.0, 0.0, 0.0, 0.0],
            },
        ]);
        zone
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn action(object_id: u64, action_id: u16, power: u8, dest: [i64; 3]) -> ActionRequest {
        match Packet::action(object_id, action_id, power, [0; 3], 0, dest) {
            Packet::Action(request) => request,
            _ => panic!("Wrong packet type"),
        }
    }

    #[test]
    fn test_connect_then_announce() {
        let zone = zone();
        let (control, sink) = recording_control(7, ACCESS_MOVE);

        zone.connect_game_object(&control, 100).unwrap();
        assert!(zone.object(100).unwrap().visible);
        assert_eq!(control.object_id(), Some(100));
        assert!(sink.sent.lock().unwrap().is_empty());

        zone.announce(100);
        assert!(wait_until(|| !sink.sent.lock().unwrap().is_empty()));
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0].1.kind(), POSUPD);
    }

    #[test]
    fn test_connect_unknown_or_taken_object() {
        let zone = zone();
        let (alice, _) = recording_control(7, ACCESS_MOVE);
        let (bob, _) = recording_control(8, ACCESS_MOVE);

        assert!(zone.connect_game_object(&alice, 999).is_err());
        zone.connect_game_object(&alice, 100).unwrap();
        assert!(zone.connect_game_object(&bob, 100).is_err());
        // Reconnecting the same control is fine
        assert!(zone.connect_game_object(&alice, 100).is_ok());
    }

    #[test]
    fn test_disconnect_hides_and_notifies_neighbours() {
        let zone = zone();
        let (alice, _) = recording_control(7, ACCESS_MOVE);
        let (bob, bob_sink) = recording_control(8, ACCESS_MOVE);
        let (carol, carol_sink) = recording_control(9, ACCESS_MOVE);
        zone.connect_game_object(&alice, 100).unwrap();
        zone.connect_game_object(&bob, 200).unwrap();
        zone.connect_game_object(&carol, 300).unwrap();

        zone.disconnect_game_object(100);
        let object = zone.object(100).unwrap();
        assert!(!object.visible);
        assert!(object.controller().is_none());
        assert_eq!(alice.object_id(), None);

        let deleted = |sink: &crate::control::tests::RecordingSink| {
            sink.sent
                .lock()
                .unwrap()
                .iter()
                .any(|(_, p)| p.kind() == OBJDEL)
        };
        assert!(deleted(&bob_sink));
        assert!(!deleted(&carol_sink));
    }

    #[test]
    fn test_move_to_and_integrate() {
        let zone = zone();
        let (control, _) = recording_control(7, ACCESS_MOVE);
        zone.connect_game_object(&control, 100).unwrap();

        // Full intensity towards (10, 0, 0): 5 m/s
        let result = zone.execute_action(&control, &action(100, 1, 100, [1000, 0, 0]));
        assert_eq!(result, ACTION_SUCCESS);
        let object = zone.object(100).unwrap();
        assert_approx_eq!(object.velocity[0], 5.0);
        assert_eq!(object.destination, Some([10.0, 0.0, 0.0]));

        zone.step_object(100, 1.0).unwrap();
        assert_approx_eq!(zone.object(100).unwrap().position[0], 5.0);

        // Overshooting step lands exactly on the destination and stops
        zone.step_object(100, 2.0).unwrap();
        let object = zone.object(100).unwrap();
        assert_approx_eq!(object.position[0], 10.0);
        assert!(!object.is_moving());
        assert_eq!(object.frame, 2);
    }

    #[test]
    fn test_stop_and_look_at() {
        let zone = zone();
        let (control, _) = recording_control(7, ACCESS_MOVE);
        zone.connect_game_object(&control, 100).unwrap();

        zone.execute_action(&control, &action(100, 1, 50, [1000, 0, 0]));
        assert_eq!(zone.execute_action(&control, &action(100, 2, 0, [0; 3])), ACTION_SUCCESS);
        assert!(!zone.object(100).unwrap().is_moving());

        assert_eq!(
            zone.execute_action(&control, &action(100, 3, 0, [0, 500, 0])),
            ACTION_SUCCESS
        );
        let object = zone.object(100).unwrap();
        assert_approx_eq!(object.look[1], 1.0);
        assert_approx_eq!(object.orientation[0], std::f64::consts::FRAC_1_SQRT_2);
        assert_approx_eq!(object.orientation[3], std::f64::consts::FRAC_1_SQRT_2);
    }

    #[test]
    fn test_action_rejections() {
        let zone = zone();
        let (mover, _) = recording_control(7, ACCESS_MOVE);
        let (viewer, _) = recording_control(8, ACCESS_VIEW);
        zone.connect_game_object(&mover, 100).unwrap();

        // Unknown action id
        assert_eq!(zone.execute_action(&mover, &action(100, 99, 10, [0; 3])), ACTION_REJECTED);
        // Intensity outside move_to bounds
        assert_eq!(zone.execute_action(&mover, &action(100, 1, 0, [0; 3])), ACTION_REJECTED);
        assert_eq!(zone.execute_action(&mover, &action(100, 1, 101, [0; 3])), ACTION_REJECTED);
        // Someone else's object
        assert_eq!(zone.execute_action(&mover, &action(200, 2, 0, [0; 3])), ACTION_REJECTED);
        // View-only access
        assert_eq!(zone.execute_action(&viewer, &action(100, 2, 0, [0; 3])), ACTION_REJECTED);
    }

    #[test]
    fn test_action_on_hidden_object_fails() {
        let zone = zone();
        let (admin, _) = recording_control(1, ACCESS_MODIFY);
        // Object 200 exists but nobody controls it, so it is not visible
        assert_eq!(zone.execute_action(&admin, &action(200, 2, 0, [0; 3])), ACTION_FAILED);
    }

    #[test]
    fn test_submitted_action_is_acknowledged() {
        let zone = zone();
        let (control, sink) = recording_control(7, ACCESS_MOVE);
        zone.connect_game_object(&control, 100).unwrap();

        zone.submit_action(control.clone(), action(100, 2, 0, [0; 3])).unwrap();
        assert!(wait_until(|| sink.sent.lock().unwrap().iter().any(|(_, p)| matches!(
            p,
            Packet::Ack(ack) if ack.request == ACTREQ && ack.misc == [ACTION_SUCCESS, 2, 0, 0]
        ))));
    }

    #[test]
    fn test_updates_respect_radius() {
        let zone = zone();
        let (near, near_sink) = recording_control(8, ACCESS_MOVE);
        let (far, far_sink) = recording_control(9, ACCESS_MOVE);
        zone.connect_game_object(&near, 200).unwrap();
        zone.connect_game_object(&far, 300).unwrap();

        let (mover, _) = recording_control(7, ACCESS_MOVE);
        zone.connect_game_object(&mover, 100).unwrap();
        zone.broadcast_update(100).unwrap();

        let got_update = |sink: &crate::control::tests::RecordingSink| {
            sink.sent.lock().unwrap().iter().any(|(_, p)| {
                matches!(p, Packet::Position(update) if update.object_id == 100)
            })
        };
        assert!(wait_until(|| got_update(&near_sink)));
        assert!(!got_update(&far_sink));
    }

    #[test]
    fn test_tick_moves_objects() {
        let zone = zone();
        let (control, _) = recording_control(7, ACCESS_MOVE);
        zone.connect_game_object(&control, 100).unwrap();
        zone.set_course(100, [0.0, 10.0, 0.0], 5.0).unwrap();

        zone.tick_motion(0.5);
        assert!(wait_until(|| zone.object(100).unwrap().position[1] > 2.0));
    }
}
