//! Network event handling and callback dispatch

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::network::{NetworkEvent, NetworkHandle};
use crate::sync::{
    AlignmentPoint as InternalAlignmentPoint, ObjectId, ObjectRecord as InternalObjectRecord,
    PeerId, SceneBridge, SyncCoordinator, SyncObserver, Transform,
};

use super::types::{AlignmentPoint, ObjectRecord, SessionCallback};

/// Coordinator shared between the session, the network task and the drag tick
pub type SharedCoordinator = Arc<Mutex<SyncCoordinator>>;

/// Slot for the native callback, set any time after construction
pub type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

/// Handle of the running network, `None` until started or after it exits
pub type SharedNetwork = Arc<RwLock<Option<NetworkHandle>>>;

/// A callback queued for the native side
#[derive(Debug)]
pub enum CallbackEvent {
    AlignmentPointsChanged(Vec<AlignmentPoint>),
    ObjectsChanged(Vec<ObjectRecord>),
    ObjectUpserted(ObjectRecord),
    PeersJoined(Vec<String>),
    LiveTransform { object_id: String, transform: Vec<f32> },
    Error(String),
}

/// Observer/scene adapter that queues callbacks instead of calling out
/// while the coordinator lock is held
pub struct CallbackBridge {
    tx: mpsc::UnboundedSender<CallbackEvent>,
}

impl CallbackBridge {
    pub fn new(tx: mpsc::UnboundedSender<CallbackEvent>) -> Self {
        Self { tx }
    }

    fn queue(&self, event: CallbackEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl SyncObserver for CallbackBridge {
    fn on_alignment_points_changed(&self, points: &[InternalAlignmentPoint]) {
        self.queue(CallbackEvent::AlignmentPointsChanged(
            points.iter().map(AlignmentPoint::from).collect(),
        ));
    }

    fn on_objects_changed(&self, objects: &[InternalObjectRecord]) {
        self.queue(CallbackEvent::ObjectsChanged(
            objects.iter().map(ObjectRecord::from).collect(),
        ));
    }

    fn on_object_upserted(&self, object: &InternalObjectRecord) {
        self.queue(CallbackEvent::ObjectUpserted(ObjectRecord::from(object)));
    }

    fn on_peers_joined(&self, peers: &[PeerId]) {
        self.queue(CallbackEvent::PeersJoined(peers.to_vec()));
    }
}

impl SceneBridge for CallbackBridge {
    // Node lookup happens on the native side, which ignores unknown ids
    fn apply_live_transform(&self, object_id: &ObjectId, transform: &Transform) -> bool {
        self.queue(CallbackEvent::LiveTransform {
            object_id: object_id.to_string(),
            transform: transform.to_vec(),
        })
    }
}

/// Handle a network event
pub fn handle_network_event(
    event: NetworkEvent,
    coordinator: &SharedCoordinator,
    callback_tx: &mpsc::UnboundedSender<CallbackEvent>,
) {
    match event {
        NetworkEvent::Ready { peer_id } => {
            info!("Network ready with peer ID: {}", peer_id);
        }

        NetworkEvent::PeersChanged { peers } => {
            debug!("Session membership: {:?}", peers);
            coordinator.lock().on_peer_list_changed(&peers);
        }

        NetworkEvent::Blob { from, data } => {
            debug!("Blob of {} bytes from {}", data.len(), from);
            coordinator.lock().on_blob_received(&data);
        }

        NetworkEvent::Error(e) => {
            warn!("Network error: {}", e);
            let _ = callback_tx.send(CallbackEvent::Error(e));
        }
    }
}

/// Feed network events to the coordinator until the network task exits,
/// then forget its handle so the next session starts a fresh one
pub async fn run_network_events(
    mut event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    local_peer_id: String,
    coordinator: SharedCoordinator,
    network: SharedNetwork,
    callback_tx: mpsc::UnboundedSender<CallbackEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        handle_network_event(event, &coordinator, &callback_tx);
    }

    let mut slot = network.write();
    if slot.as_ref().map(|h| h.local_peer_id == local_peer_id) == Some(true) {
        *slot = None;
    }
    debug!("Network event loop ended for {}", local_peer_id);
}

/// Send one preview frame per period while the coordinator has a drag.
///
/// Ends on cancel or as soon as no drag is active.
pub async fn run_drag_tick(
    coordinator: SharedCoordinator,
    period: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    debug!("Drag tick started ({:?})", period);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                debug!("Drag tick cancelled");
                break;
            }
            _ = ticker.tick() => {
                if !coordinator.lock().drag_tick() {
                    debug!("No active drag, stopping tick");
                    break;
                }
            }
        }
    }
}

/// Forward queued events to the native callback until the channel closes
pub async fn dispatch_callbacks(
    mut rx: mpsc::UnboundedReceiver<CallbackEvent>,
    callback: SharedCallback,
) {
    while let Some(event) = rx.recv().await {
        let Some(cb) = callback.read().clone() else {
            debug!("No callback registered, dropping {:?}", event);
            continue;
        };
        deliver(cb.as_ref(), event);
    }
    debug!("Callback dispatcher stopped");
}

fn deliver(cb: &dyn SessionCallback, event: CallbackEvent) {
    match event {
        CallbackEvent::AlignmentPointsChanged(points) => cb.on_alignment_points_changed(points),
        CallbackEvent::ObjectsChanged(objects) => cb.on_objects_changed(objects),
        CallbackEvent::ObjectUpserted(object) => cb.on_object_upserted(object),
        CallbackEvent::PeersJoined(peers) => cb.on_peers_joined(peers),
        CallbackEvent::LiveTransform {
            object_id,
            transform,
        } => cb.on_live_transform(object_id, transform),
        CallbackEvent::Error(message) => cb.on_error(message),
    }
}
