//! Session implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::network::{NetworkError, NetworkHandle, NetworkManager, SessionCode};
use crate::sync::{ObjectId, Role as InternalRole, SyncCoordinator, Transport};

use super::handlers::{
    dispatch_callbacks, run_drag_tick, run_network_events, CallbackBridge, CallbackEvent,
    SharedCallback, SharedCoordinator, SharedNetwork,
};
use super::types::*;

static TRACING_INIT: Once = Once::new();

/// Transport that forwards to the network once it has been started
struct NetworkSlot(SharedNetwork);

impl Transport for NetworkSlot {
    fn send(&self, data: Vec<u8>) -> Result<(), NetworkError> {
        match self.0.read().as_ref() {
            Some(handle) => handle.broadcast(data),
            None => Err(NetworkError::NotInSession),
        }
    }
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct Session {
    runtime: Runtime,
    coordinator: SharedCoordinator,
    callback: SharedCallback,
    network_handle: SharedNetwork,
    session_code: RwLock<Option<SessionCode>>,
    /// Handle for cancelling the drag preview loop
    drag_tick_cancel: Mutex<Option<oneshot::Sender<()>>>,
    callback_tx: mpsc::UnboundedSender<CallbackEvent>,
}

#[uniffi::export]
impl Session {
    /// Create a new session
    #[uniffi::constructor]
    pub fn new() -> Result<Self, CoreError> {
        TRACING_INIT.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "workspace_ar_core=debug,libp2p_mdns=info,libp2p_gossipsub=info",
                )
            });
            // Another subscriber may already be installed by the host app
            let _ = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!("Initializing workspace-ar-core session");

        let runtime = Runtime::new()
            .map_err(|e| CoreError::NetworkError(format!("Failed to create runtime: {}", e)))?;

        let network_handle: SharedNetwork = Arc::new(RwLock::new(None));
        let callback: SharedCallback = Arc::new(RwLock::new(None));
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();

        let mut coordinator =
            SyncCoordinator::new(Arc::new(NetworkSlot(Arc::clone(&network_handle))));
        let bridge = Arc::new(CallbackBridge::new(callback_tx.clone()));
        coordinator.set_observer(bridge.clone());
        coordinator.set_scene(bridge);

        runtime.spawn(dispatch_callbacks(callback_rx, Arc::clone(&callback)));

        Ok(Self {
            runtime,
            coordinator: Arc::new(Mutex::new(coordinator)),
            callback,
            network_handle,
            session_code: RwLock::new(None),
            drag_tick_cancel: Mutex::new(None),
            callback_tx,
        })
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    // === Session ===

    /// Host a new session and return its code
    pub fn host_session(&self) -> Result<String, CoreError> {
        self.check_can_enter(InternalRole::Host)?;

        let handle = self.ensure_network_running()?;
        let code = SessionCode::random();
        let display = code.to_string();
        self.enter_session(InternalRole::Host, code, &handle)?;
        Ok(display)
    }

    /// Join a session hosted by another device
    pub fn join_session(&self, session_code: String) -> Result<(), CoreError> {
        let code = SessionCode::parse(&session_code).ok_or(CoreError::InvalidSessionCode)?;
        self.check_can_enter(InternalRole::Client)?;

        let handle = self.ensure_network_running()?;
        self.enter_session(InternalRole::Client, code, &handle)
    }

    /// Leave the current session and forget all shared state
    pub fn leave_session(&self) -> Result<(), CoreError> {
        let Some(code) = self.session_code.write().take() else {
            return Err(CoreError::NotInSession);
        };

        self.stop_drag_tick();

        if let Some(handle) = self.network_handle.read().as_ref() {
            if let Err(e) = handle.leave_session() {
                warn!("Failed to leave session {}: {}", code, e);
            }
        }

        self.coordinator.lock().full_reset();

        info!("Left session {}", code);
        Ok(())
    }

    pub fn get_session_code(&self) -> Option<String> {
        self.session_code.read().as_ref().map(|c| c.to_string())
    }

    pub fn get_local_peer_id(&self) -> Option<String> {
        self.network_handle
            .read()
            .as_ref()
            .map(|h| h.local_peer_id.clone())
    }

    /// Peers currently in the session, sorted
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .coordinator
            .lock()
            .session()
            .connected_peers()
            .iter()
            .cloned()
            .collect();
        peers.sort();
        peers
    }

    pub fn set_phase(&self, phase: Phase) {
        self.coordinator.lock().set_phase(phase.into());
    }

    pub fn get_phase(&self) -> Phase {
        self.coordinator.lock().session().phase().into()
    }

    pub fn get_role(&self) -> Role {
        self.coordinator.lock().session().role().into()
    }

    // === Alignment ===

    /// Record the locally selected alignment points
    pub fn set_alignment_points(&self, points: Vec<AlignmentPoint>) -> Result<(), CoreError> {
        let points = alignment_points_from_ffi(points)?;
        self.coordinator.lock().set_alignment_points(points);
        Ok(())
    }

    /// Enter Creative and share the alignment points.
    ///
    /// Returns false when the points were not sent because this device
    /// is not the host.
    pub fn finalize_alignment(&self) -> bool {
        self.coordinator.lock().finalize_alignment()
    }

    pub fn get_alignment_points(&self) -> Vec<AlignmentPoint> {
        self.coordinator
            .lock()
            .alignment_points()
            .iter()
            .map(AlignmentPoint::from)
            .collect()
    }

    // === Objects ===

    /// All placed objects in placement order
    pub fn get_objects(&self) -> Vec<ObjectRecord> {
        self.coordinator
            .lock()
            .store()
            .iter()
            .map(ObjectRecord::from)
            .collect()
    }

    /// Remove an object from this device only
    pub fn remove_object(&self, object_id: String) -> bool {
        self.coordinator
            .lock()
            .remove_object(&ObjectId::from(object_id))
            .is_some()
    }

    // === Drag ===

    /// Start placing a new object. Returns the id it will be committed under.
    pub fn begin_placing(
        &self,
        template: ObjectTemplate,
        transform: Vec<f32>,
    ) -> Result<String, CoreError> {
        let transform = transform_from_ffi(&transform)?;
        let id = self
            .coordinator
            .lock()
            .begin_drag_new(template.into(), transform)?;

        self.start_drag_tick();
        debug!("Placing new object {}", id);
        Ok(id.to_string())
    }

    /// Start moving an already placed object
    pub fn begin_moving(&self, object_id: String) -> Result<(), CoreError> {
        let id = self
            .coordinator
            .lock()
            .begin_drag_existing(&ObjectId::from(object_id))?;

        self.start_drag_tick();
        debug!("Moving object {}", id);
        Ok(())
    }

    /// Update the transform of the object being dragged.
    /// Returns false when nothing is being dragged.
    pub fn update_drag(&self, transform: Vec<f32>) -> Result<bool, CoreError> {
        let transform = transform_from_ffi(&transform)?;
        Ok(self.coordinator.lock().update_drag(transform))
    }

    /// Commit the dragged object and share it
    pub fn lock_in(&self, physics_override: Option<PhysicsParams>) -> Option<ObjectRecord> {
        self.stop_drag_tick();
        self.coordinator
            .lock()
            .lock_in(physics_override.map(Into::into))
            .map(|record| ObjectRecord::from(&record))
    }

    pub fn cancel_drag(&self) -> bool {
        self.stop_drag_tick();
        self.coordinator.lock().cancel_drag()
    }

    /// Forget all objects, alignment and role. The network stays up.
    pub fn full_reset(&self) {
        self.stop_drag_tick();
        self.coordinator.lock().full_reset();
    }
}

impl Session {
    /// Reject entering a session while in one or with a different role
    fn check_can_enter(&self, role: InternalRole) -> Result<(), CoreError> {
        if self.session_code.read().is_some() {
            return Err(CoreError::AlreadyInSession);
        }
        let current = self.coordinator.lock().session().role();
        if current != InternalRole::Unassigned && current != role {
            return Err(CoreError::AlreadyInSession);
        }
        Ok(())
    }

    /// Subscribe to the session topic, then take the role.
    ///
    /// Nothing changes locally when the network refuses the join.
    fn enter_session(
        &self,
        role: InternalRole,
        code: SessionCode,
        handle: &NetworkHandle,
    ) -> Result<(), CoreError> {
        self.check_can_enter(role)?;

        handle
            .join_session(code.as_str())
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;

        self.coordinator.lock().assign_role(role)?;
        info!("Entered session {} as {:?}", code, role);
        *self.session_code.write() = Some(code);
        Ok(())
    }

    /// Ensure the network is running, start it if not
    fn ensure_network_running(&self) -> Result<NetworkHandle, CoreError> {
        if let Some(handle) = self.network_handle.read().as_ref() {
            if handle.is_running() {
                return Ok(handle.clone());
            }
            debug!("Network {} has stopped, starting a new one", handle.local_peer_id);
        }

        let network_manager =
            NetworkManager::new().map_err(|e| CoreError::NetworkError(e.to_string()))?;

        let (handle, event_rx) = self
            .runtime
            .block_on(async { network_manager.start() })
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;

        *self.network_handle.write() = Some(handle.clone());

        self.runtime.spawn(run_network_events(
            event_rx,
            handle.local_peer_id.clone(),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.network_handle),
            self.callback_tx.clone(),
        ));

        Ok(handle)
    }

    /// Start the drag preview loop (sends one frame per tick)
    fn start_drag_tick(&self) {
        self.stop_drag_tick();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.drag_tick_cancel.lock() = Some(cancel_tx);

        let period = self.coordinator.lock().config().drag_tick_interval;
        self.runtime
            .spawn(run_drag_tick(Arc::clone(&self.coordinator), period, cancel_rx));
    }

    /// Stop the drag preview loop
    fn stop_drag_tick(&self) {
        if let Some(tx) = self.drag_tick_cancel.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_drag_tick();
        if let Some(handle) = self.network_handle.read().as_ref() {
            handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct RecordingCallback {
        upserted: Mutex<Vec<String>>,
        object_sets: Mutex<Vec<usize>>,
    }

    impl SessionCallback for RecordingCallback {
        fn on_alignment_points_changed(&self, _points: Vec<AlignmentPoint>) {}
        fn on_objects_changed(&self, objects: Vec<ObjectRecord>) {
            self.object_sets.lock().push(objects.len());
        }
        fn on_object_upserted(&self, object: ObjectRecord) {
            self.upserted.lock().push(object.id);
        }
        fn on_peers_joined(&self, _peer_ids: Vec<String>) {}
        fn on_live_transform(&self, _object_id: String, _transform: Vec<f32>) {}
        fn on_error(&self, _message: String) {}
    }

    /// Forwards to a shared recorder so the test keeps a handle on it
    struct Forward(Arc<RecordingCallback>);

    impl SessionCallback for Forward {
        fn on_alignment_points_changed(&self, points: Vec<AlignmentPoint>) {
            self.0.on_alignment_points_changed(points)
        }
        fn on_objects_changed(&self, objects: Vec<ObjectRecord>) {
            self.0.on_objects_changed(objects)
        }
        fn on_object_upserted(&self, object: ObjectRecord) {
            self.0.on_object_upserted(object)
        }
        fn on_peers_joined(&self, peer_ids: Vec<String>) {
            self.0.on_peers_joined(peer_ids)
        }
        fn on_live_transform(&self, object_id: String, transform: Vec<f32>) {
            self.0.on_live_transform(object_id, transform)
        }
        fn on_error(&self, message: String) {
            self.0.on_error(message)
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    fn lamp() -> ObjectTemplate {
        ObjectTemplate {
            display_name: "Lamp".to_string(),
            model_reference: "lamp.scn".to_string(),
            description_text: "A desk lamp".to_string(),
            animation_references: vec!["flicker".to_string()],
            physics: PhysicsParams {
                mass: 1.0,
                restitution: 0.2,
                is_static: false,
            },
        }
    }

    fn translation(x: f32) -> Vec<f32> {
        let mut m = vec![0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        m[12] = x;
        m
    }

    #[test]
    fn test_place_and_lock_in_without_network() {
        let session = Session::new().unwrap();
        let recorder = Arc::new(RecordingCallback::default());
        session.set_callback(Box::new(Forward(recorder.clone())));

        let id = session.begin_placing(lamp(), translation(0.5)).unwrap();
        assert!(session.get_objects().is_empty());
        assert!(session.update_drag(translation(1.5)).unwrap());

        let record = session.lock_in(None).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.transform[12], 1.5);
        assert_eq!(record.animation_references, vec!["flicker".to_string()]);

        let objects = session.get_objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, id);

        assert!(wait_for(|| recorder.upserted.lock().len() == 1));
        assert_eq!(recorder.upserted.lock()[0], id);
    }

    #[test]
    fn test_moving_existing_object() {
        let session = Session::new().unwrap();
        session.begin_placing(lamp(), translation(0.0)).unwrap();
        let id = session.lock_in(None).unwrap().id;

        session.begin_moving(id.clone()).unwrap();
        session.update_drag(translation(3.0)).unwrap();
        let moved = session
            .lock_in(Some(PhysicsParams {
                mass: 0.0,
                restitution: 0.0,
                is_static: true,
            }))
            .unwrap();

        assert_eq!(moved.id, id);
        assert!(moved.physics.is_static);
        assert_eq!(session.get_objects().len(), 1);
        assert_eq!(session.get_objects()[0].transform[12], 3.0);
    }

    #[test]
    fn test_drag_errors() {
        let session = Session::new().unwrap();

        assert!(matches!(
            session.begin_moving("missing".to_string()),
            Err(CoreError::UnknownObject(_))
        ));
        assert!(matches!(
            session.begin_placing(lamp(), vec![1.0; 3]),
            Err(CoreError::InvalidTransform(3))
        ));

        let id = session.begin_placing(lamp(), translation(0.0)).unwrap();
        assert!(matches!(
            session.begin_placing(lamp(), translation(1.0)),
            Err(CoreError::DragInProgress(ref active)) if *active == id
        ));

        assert!(session.cancel_drag());
        assert!(!session.cancel_drag());
        assert!(session.lock_in(None).is_none());
        assert!(session.get_objects().is_empty());
        assert!(!session.update_drag(translation(2.0)).unwrap());
    }

    #[test]
    fn test_session_guards() {
        let session = Session::new().unwrap();
        assert!(matches!(
            session.join_session("nope".to_string()),
            Err(CoreError::InvalidSessionCode)
        ));
        assert!(matches!(
            session.leave_session(),
            Err(CoreError::NotInSession)
        ));
        assert_eq!(session.get_session_code(), None);
        assert_eq!(session.get_local_peer_id(), None);
        assert_eq!(session.get_role(), Role::Unassigned);
    }

    #[test]
    fn test_alignment_and_reset() {
        let session = Session::new().unwrap();
        let recorder = Arc::new(RecordingCallback::default());
        session.set_callback(Box::new(Forward(recorder.clone())));

        assert_eq!(session.get_phase(), Phase::FindingPlane);
        session.set_phase(Phase::AlignmentStage);
        session
            .set_alignment_points(vec![
                AlignmentPoint { x: 10.0, y: 20.0 },
                AlignmentPoint { x: 30.0, y: 40.0 },
            ])
            .unwrap();
        assert!(matches!(
            session.set_alignment_points(vec![AlignmentPoint { x: f64::NAN, y: 0.0 }]),
            Err(CoreError::NonFiniteValue(_))
        ));

        // Without a role the points stay local
        assert!(!session.finalize_alignment());
        assert_eq!(session.get_phase(), Phase::Creative);
        assert_eq!(session.get_alignment_points().len(), 2);

        session.begin_placing(lamp(), translation(0.0)).unwrap();
        session.lock_in(None).unwrap();
        session.begin_placing(lamp(), translation(1.0)).unwrap();

        session.full_reset();
        assert!(session.get_objects().is_empty());
        assert!(session.get_alignment_points().is_empty());
        assert_eq!(session.get_phase(), Phase::AlignmentStage);
        assert!(!session.cancel_drag());

        assert!(wait_for(|| recorder.object_sets.lock().as_slice() == [0]));
    }

    #[test]
    fn test_remove_object_is_local() {
        let session = Session::new().unwrap();
        session.begin_placing(lamp(), translation(0.0)).unwrap();
        let id = session.lock_in(None).unwrap().id;

        assert!(session.remove_object(id.clone()));
        assert!(!session.remove_object(id));
        assert!(session.get_objects().is_empty());
    }

    #[test]
    fn test_failed_network_join_leaves_session_untouched() {
        let session = Session::new().unwrap();
        let (dead, commands) = NetworkHandle::detached("peer-dead");
        drop(commands);

        let code = SessionCode::parse("ABC-DEF").unwrap();
        assert!(matches!(
            session.enter_session(InternalRole::Host, code.clone(), &dead),
            Err(CoreError::NetworkError(_))
        ));
        assert_eq!(session.get_role(), Role::Unassigned);
        assert_eq!(session.get_session_code(), None);

        // Either role can still be picked afterwards
        let (live, mut commands) = NetworkHandle::detached("peer-live");
        session
            .enter_session(InternalRole::Client, code, &live)
            .unwrap();
        assert_eq!(session.get_role(), Role::Client);
        assert_eq!(session.get_session_code(), Some("ABC-DEF".to_string()));
        assert!(commands.try_recv().is_ok());

        let other = SessionCode::parse("GHJ-KMN").unwrap();
        assert!(matches!(
            session.enter_session(InternalRole::Client, other, &live),
            Err(CoreError::AlreadyInSession)
        ));
    }
}
