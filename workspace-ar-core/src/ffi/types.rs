//! FFI types exposed via uniffi

use crate::sync::{
    AlignmentPoint as InternalAlignmentPoint, ObjectRecord as InternalObjectRecord,
    ObjectTemplate as InternalObjectTemplate, Phase as InternalPhase,
    PhysicsParams as InternalPhysicsParams, Role as InternalRole, SyncError, Transform,
};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Not in a session")]
    NotInSession,

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Invalid session code")]
    InvalidSessionCode,

    #[error("Transform must have 16 elements, got {0}")]
    InvalidTransform(u32),

    #[error("Value is not a finite number: {0}")]
    NonFiniteValue(String),

    #[error("Another object is already being moved: {0}")]
    DragInProgress(String),

    #[error("Unknown object: {0}")]
    UnknownObject(String),
}

impl From<SyncError> for CoreError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::DragInProgress(id) => CoreError::DragInProgress(id.to_string()),
            SyncError::RoleAlreadyAssigned(_) => CoreError::AlreadyInSession,
            SyncError::UnknownObject(id) => CoreError::UnknownObject(id.to_string()),
        }
    }
}

/// Parse a flat transform coming from the native side.
///
/// NaN and infinities cannot be represented on the wire, so they are
/// rejected here rather than dropped by every receiver.
pub fn transform_from_ffi(values: &[f32]) -> Result<Transform, CoreError> {
    let transform =
        Transform::from_slice(values).ok_or(CoreError::InvalidTransform(values.len() as u32))?;
    if let Some(index) = transform.0.iter().position(|v| !v.is_finite()) {
        return Err(CoreError::NonFiniteValue(format!(
            "transform[{}] = {}",
            index, transform.0[index]
        )));
    }
    Ok(transform)
}

/// Convert alignment points coming from the native side, rejecting
/// non-finite coordinates
pub fn alignment_points_from_ffi(
    points: Vec<AlignmentPoint>,
) -> Result<Vec<InternalAlignmentPoint>, CoreError> {
    points
        .into_iter()
        .enumerate()
        .map(|(index, p)| {
            if p.x.is_finite() && p.y.is_finite() {
                Ok(p.into())
            } else {
                Err(CoreError::NonFiniteValue(format!(
                    "alignment point {} = ({}, {})",
                    index, p.x, p.y
                )))
            }
        })
        .collect()
}

/// Placement flow phase exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum Phase {
    FindingPlane,
    AlignmentStage,
    Creative,
}

impl From<InternalPhase> for Phase {
    fn from(p: InternalPhase) -> Self {
        match p {
            InternalPhase::FindingPlane => Phase::FindingPlane,
            InternalPhase::AlignmentStage => Phase::AlignmentStage,
            InternalPhase::Creative => Phase::Creative,
        }
    }
}

impl From<Phase> for InternalPhase {
    fn from(p: Phase) -> Self {
        match p {
            Phase::FindingPlane => InternalPhase::FindingPlane,
            Phase::AlignmentStage => InternalPhase::AlignmentStage,
            Phase::Creative => InternalPhase::Creative,
        }
    }
}

/// Device role exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum Role {
    Unassigned,
    Host,
    Client,
}

impl From<InternalRole> for Role {
    fn from(r: InternalRole) -> Self {
        match r {
            InternalRole::Unassigned => Role::Unassigned,
            InternalRole::Host => Role::Host,
            InternalRole::Client => Role::Client,
        }
    }
}

/// Screen-space alignment point exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct AlignmentPoint {
    pub x: f64,
    pub y: f64,
}

impl From<&InternalAlignmentPoint> for AlignmentPoint {
    fn from(p: &InternalAlignmentPoint) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<AlignmentPoint> for InternalAlignmentPoint {
    fn from(p: AlignmentPoint) -> Self {
        InternalAlignmentPoint::new(p.x, p.y)
    }
}

/// Physical parameters exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct PhysicsParams {
    pub mass: f64,
    pub restitution: f64,
    /// Derived from mass, ignored on input
    pub is_static: bool,
}

impl From<InternalPhysicsParams> for PhysicsParams {
    fn from(p: InternalPhysicsParams) -> Self {
        Self {
            mass: p.mass,
            restitution: p.restitution,
            is_static: p.is_static(),
        }
    }
}

impl From<PhysicsParams> for InternalPhysicsParams {
    fn from(p: PhysicsParams) -> Self {
        InternalPhysicsParams {
            mass: p.mass,
            restitution: p.restitution,
        }
    }
}

/// Placed object exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct ObjectRecord {
    pub id: String,
    pub display_name: String,
    pub model_reference: String,
    pub description_text: String,
    /// 16 floats, root space
    pub transform: Vec<f32>,
    pub animation_references: Vec<String>,
    pub physics: PhysicsParams,
}

impl From<&InternalObjectRecord> for ObjectRecord {
    fn from(r: &InternalObjectRecord) -> Self {
        Self {
            id: r.id.to_string(),
            display_name: r.display_name.clone(),
            model_reference: r.model_reference.clone(),
            description_text: r.description_text.clone(),
            transform: r.transform.to_vec(),
            animation_references: r.animation_references.clone(),
            physics: PhysicsParams::from(r.physics),
        }
    }
}

/// Catalog entry for a new object, supplied by the UI
#[derive(Debug, Clone, uniffi::Record)]
pub struct ObjectTemplate {
    pub display_name: String,
    pub model_reference: String,
    pub description_text: String,
    pub animation_references: Vec<String>,
    pub physics: PhysicsParams,
}

impl From<ObjectTemplate> for InternalObjectTemplate {
    fn from(t: ObjectTemplate) -> Self {
        Self {
            display_name: t.display_name,
            model_reference: t.model_reference,
            description_text: t.description_text,
            animation_references: t.animation_references,
            physics: t.physics.into(),
        }
    }
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_alignment_points_changed(&self, points: Vec<AlignmentPoint>);
    /// Whole object set (resync or reset)
    fn on_objects_changed(&self, objects: Vec<ObjectRecord>);
    fn on_object_upserted(&self, object: ObjectRecord);
    /// Peers new since the last membership change; empty when peers only left
    fn on_peers_joined(&self, peer_ids: Vec<String>);
    /// Preview transform of an object a peer is dragging; do not persist
    fn on_live_transform(&self, object_id: String, transform: Vec<f32>);
    fn on_error(&self, message: String);
}
