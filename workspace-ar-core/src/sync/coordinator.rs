//! Sync Coordinator
//!
//! The only component that talks to the transport. It owns the object
//! store, the alignment points, the session state and the local drag, and
//! is the single place where "the store changed" is decided.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::drag::{DragController, ObjectTemplate};
use super::protocol::{
    self, AlignmentPoint, ObjectId, ObjectRecord, PeerId, PhysicsParams, Transform, WireMessage,
};
use super::state::{Phase, Role, SessionState};
use super::store::ObjectStore;
use super::{SyncConfig, SyncError};
use crate::network::NetworkError;

/// Outbound side of the peer transport. Sends go to every connected peer.
pub trait Transport: Send + Sync {
    fn send(&self, data: Vec<u8>) -> Result<(), NetworkError>;
}

/// Receives replicated state changes (scene/UI layer)
pub trait SyncObserver: Send + Sync {
    fn on_alignment_points_changed(&self, points: &[AlignmentPoint]);
    /// Whole object set, used for resyncs and resets
    fn on_objects_changed(&self, objects: &[ObjectRecord]);
    /// A single object was created or replaced
    fn on_object_upserted(&self, object: &ObjectRecord);
    fn on_peers_joined(&self, peers: &[PeerId]);
}

/// Live-drag path into the scene
pub trait SceneBridge: Send + Sync {
    /// Move the scene node for `object_id` right away.
    ///
    /// Must be cheap and must not send anything. Returns false when the
    /// scene has no such node.
    fn apply_live_transform(&self, object_id: &ObjectId, transform: &Transform) -> bool;
}

pub struct SyncCoordinator {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    observer: Option<Arc<dyn SyncObserver>>,
    scene: Option<Arc<dyn SceneBridge>>,
    session: SessionState,
    store: ObjectStore,
    alignment_points: Vec<AlignmentPoint>,
    drag: DragController,
}

impl SyncCoordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(SyncConfig::default(), transport)
    }

    pub fn with_config(config: SyncConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            observer: None,
            scene: None,
            session: SessionState::new(),
            store: ObjectStore::new(),
            alignment_points: Vec::new(),
            drag: DragController::new(),
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn SyncObserver>) {
        self.observer = Some(observer);
    }

    pub fn set_scene(&mut self, scene: Arc<dyn SceneBridge>) {
        self.scene = Some(scene);
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn alignment_points(&self) -> &[AlignmentPoint] {
        &self.alignment_points
    }

    pub fn drag(&self) -> &DragController {
        &self.drag
    }

    // === Session ===

    pub fn assign_role(&mut self, role: Role) -> Result<(), SyncError> {
        self.session.assign_role(role)?;
        info!("Role assigned: {:?}", role);
        Ok(())
    }

    pub fn set_phase(&mut self, phase: Phase) {
        debug!("Phase: {:?} -> {:?}", self.session.phase(), phase);
        self.session.set_phase(phase);
    }

    /// Local alignment selection; nothing is sent until alignment is finalized
    pub fn set_alignment_points(&mut self, points: Vec<AlignmentPoint>) {
        self.alignment_points = points;
    }

    /// Host finished picking points: enter Creative and share them
    pub fn finalize_alignment(&mut self) -> bool {
        self.set_phase(Phase::Creative);
        self.broadcast_alignment_points()
    }

    // === Transport events ===

    /// Full membership from the transport.
    ///
    /// The observer always hears about the change, with only the peers
    /// that were not connected before (possibly none).
    pub fn on_peer_list_changed(&mut self, peers: &[PeerId]) {
        let joined = self.session.replace_peers(peers);
        if joined.is_empty() {
            debug!("Peer list changed, {} connected, nobody new", peers.len());
        } else {
            info!("New peers: {:?}", joined);
            if self.session.may_broadcast_alignment() {
                self.resync();
            } else {
                debug!("Not a creative host, skipping resync");
            }
        }

        if let Some(observer) = &self.observer {
            observer.on_peers_joined(&joined);
        }
    }

    /// Alignment points followed by every stored object, in store order
    fn resync(&self) {
        info!(
            "Resyncing {} objects and {} alignment points",
            self.store.len(),
            self.alignment_points.len()
        );
        if !self.alignment_points.is_empty() {
            self.broadcast_alignment_points();
        }
        for record in self.store.iter() {
            self.broadcast_local_object(record);
        }
        if let Some(observer) = &self.observer {
            observer.on_objects_changed(&self.store.snapshot());
        }
    }

    /// Inbound blob from any peer. Undecodable blobs are dropped.
    pub fn on_blob_received(&mut self, data: &[u8]) {
        match protocol::decode(data, self.config.max_message_bytes) {
            Ok(message) => self.apply_message(message),
            Err(e) => debug!("Dropping undecodable blob ({} bytes): {}", data.len(), e),
        }
    }

    fn apply_message(&mut self, message: WireMessage) {
        match message {
            WireMessage::AlignmentSet { points } => {
                if points == self.alignment_points {
                    debug!("Alignment points unchanged");
                    return;
                }
                info!("Received {} alignment points", points.len());
                self.alignment_points = points;
                if let Some(observer) = &self.observer {
                    observer.on_alignment_points_changed(&self.alignment_points);
                }
            }

            WireMessage::ObjectRecord(record) => {
                debug!("Object update received: {} ({})", record.id, record.display_name);
                self.store.upsert(record.clone());
                if let Some(observer) = &self.observer {
                    observer.on_object_upserted(&record);
                }
            }

            WireMessage::AnimationFrame {
                object_id,
                transform,
            } => {
                let applied = self
                    .scene
                    .as_ref()
                    .map(|scene| scene.apply_live_transform(&object_id, &transform))
                    .unwrap_or(false);
                if !applied {
                    debug!("Ignoring frame for unknown object {}", object_id);
                }
            }
        }
    }

    // === Outbound ===

    fn send(&self, message: &WireMessage) {
        let data = match protocol::encode(message) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };
        if let Err(e) = self.transport.send(data) {
            debug!("Send of {} failed (may be no peers yet): {}", message.kind(), e);
        }
    }

    pub fn broadcast_local_object(&self, record: &ObjectRecord) {
        self.send(&WireMessage::ObjectRecord(record.clone()));
    }

    /// Share the alignment points. Suppressed unless we are a creative host.
    pub fn broadcast_alignment_points(&self) -> bool {
        if !self.session.is_host() {
            debug!("Not host, not broadcasting alignment points");
            return false;
        }
        if self.session.phase() != Phase::Creative {
            debug!("Alignment not finished, not broadcasting points");
            return false;
        }
        self.send(&WireMessage::AlignmentSet {
            points: self.alignment_points.clone(),
        });
        true
    }

    /// Commit a locally produced record and share it
    pub fn commit_local_object(&mut self, record: ObjectRecord) {
        self.store.upsert(record.clone());
        if let Some(observer) = &self.observer {
            observer.on_object_upserted(&record);
        }
        self.broadcast_local_object(&record);
    }

    /// Local-only removal; there is no removal message on the wire
    pub fn remove_object(&mut self, id: &ObjectId) -> Option<ObjectRecord> {
        let removed = self.store.remove(id);
        if removed.is_none() {
            debug!("Remove of unknown object {} ignored", id);
        }
        removed
    }

    // === Drag ===

    pub fn begin_drag_new(
        &mut self,
        template: ObjectTemplate,
        initial_transform: Transform,
    ) -> Result<ObjectId, SyncError> {
        self.drag.begin_new(template, initial_transform)
    }

    pub fn begin_drag_existing(&mut self, id: &ObjectId) -> Result<ObjectId, SyncError> {
        if let Some(session) = self.drag.session() {
            return Err(SyncError::DragInProgress(session.object_id().clone()));
        }
        let record = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownObject(id.clone()))?;
        self.drag.begin_existing(record)
    }

    pub fn update_drag(&mut self, transform: Transform) -> bool {
        self.drag.update_transform(transform)
    }

    /// Send one preview frame. Returns false when no drag is active.
    pub fn drag_tick(&self) -> bool {
        match self.drag.tick() {
            Some(frame) => {
                self.send(&frame);
                true
            }
            None => false,
        }
    }

    /// Finish the local drag and commit it
    pub fn lock_in(&mut self, physics_override: Option<PhysicsParams>) -> Option<ObjectRecord> {
        let record = self.drag.lock_in(physics_override)?;
        info!("Locked in {} at {:?}", record.id, record.transform.translation());
        self.commit_local_object(record.clone());
        Some(record)
    }

    pub fn cancel_drag(&mut self) -> bool {
        match self.drag.cancel() {
            Some(session) => {
                debug!("Drag of {} cancelled", session.object_id());
                true
            }
            None => false,
        }
    }

    /// Forget everything; the transport connection is left alone
    pub fn full_reset(&mut self) {
        self.drag.cancel();
        self.store.clear();
        self.alignment_points.clear();
        self.session.reset();
        if let Some(observer) = &self.observer {
            observer.on_objects_changed(&[]);
        }
        info!("Full reset");
    }
}
