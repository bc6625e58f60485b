//! Local drag/lock ownership
//!
//! A device moves at most one object at a time. While the drag is active
//! the coordinator emits preview frames; lock-in turns the session into an
//! authoritative [`ObjectRecord`].

use tracing::debug;

use super::protocol::{ObjectId, ObjectRecord, PhysicsParams, Transform, WireMessage};
use super::SyncError;

/// Catalog entry a new object is created from
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTemplate {
    pub display_name: String,
    pub model_reference: String,
    pub description_text: String,
    pub animation_references: Vec<String>,
    pub physics: PhysicsParams,
}

/// What the drag started from
#[derive(Debug, Clone, PartialEq)]
pub enum DragOrigin {
    /// Brand-new object, not in the store yet
    NewObject(ObjectTemplate),
    /// Record already in the store when the drag began
    Existing(ObjectRecord),
}

/// The single in-progress manipulation on this device
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    object_id: ObjectId,
    transform: Transform,
    origin: DragOrigin,
}

impl DragSession {
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    /// Provisional transform in the shared root space
    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn is_new_object(&self) -> bool {
        matches!(self.origin, DragOrigin::NewObject(_))
    }

    fn into_record(self, physics_override: Option<PhysicsParams>) -> ObjectRecord {
        match self.origin {
            DragOrigin::NewObject(template) => ObjectRecord {
                id: self.object_id,
                display_name: template.display_name,
                model_reference: template.model_reference,
                description_text: template.description_text,
                transform: self.transform,
                animation_references: template.animation_references,
                physics: physics_override.unwrap_or(template.physics),
            },
            DragOrigin::Existing(record) => ObjectRecord {
                transform: self.transform,
                physics: physics_override.unwrap_or(record.physics),
                ..record
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(DragSession),
}

#[derive(Debug, Default)]
pub struct DragController {
    state: DragState,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    pub fn session(&self) -> Option<&DragSession> {
        match &self.state {
            DragState::Dragging(session) => Some(session),
            DragState::Idle => None,
        }
    }

    /// Start placing a new object.
    ///
    /// The id is allocated here so preview frames already carry it.
    pub fn begin_new(
        &mut self,
        template: ObjectTemplate,
        initial_transform: Transform,
    ) -> Result<ObjectId, SyncError> {
        self.begin(DragSession {
            object_id: ObjectId::generate(),
            transform: initial_transform,
            origin: DragOrigin::NewObject(template),
        })
    }

    /// Start moving an object that is already in the store
    pub fn begin_existing(&mut self, record: ObjectRecord) -> Result<ObjectId, SyncError> {
        self.begin(DragSession {
            object_id: record.id.clone(),
            transform: record.transform,
            origin: DragOrigin::Existing(record),
        })
    }

    fn begin(&mut self, session: DragSession) -> Result<ObjectId, SyncError> {
        if let DragState::Dragging(active) = &self.state {
            return Err(SyncError::DragInProgress(active.object_id.clone()));
        }
        let id = session.object_id.clone();
        debug!("Drag started for {} (new: {})", id, session.is_new_object());
        self.state = DragState::Dragging(session);
        Ok(id)
    }

    /// Move the provisional transform. Returns false when idle.
    pub fn update_transform(&mut self, transform: Transform) -> bool {
        match &mut self.state {
            DragState::Dragging(session) => {
                session.transform = transform;
                true
            }
            DragState::Idle => false,
        }
    }

    /// Preview frame for the current tick, if dragging
    pub fn tick(&self) -> Option<WireMessage> {
        self.session().map(|session| WireMessage::AnimationFrame {
            object_id: session.object_id.clone(),
            transform: session.transform,
        })
    }

    /// Finish the drag and produce the record to commit
    pub fn lock_in(&mut self, physics_override: Option<PhysicsParams>) -> Option<ObjectRecord> {
        match std::mem::take(&mut self.state) {
            DragState::Dragging(session) => Some(session.into_record(physics_override)),
            DragState::Idle => None,
        }
    }

    /// Drop the drag without producing anything
    pub fn cancel(&mut self) -> Option<DragSession> {
        match std::mem::take(&mut self.state) {
            DragState::Dragging(session) => Some(session),
            DragState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ObjectTemplate {
        ObjectTemplate {
            display_name: "Metal".to_string(),
            model_reference: "Block_Metal".to_string(),
            description_text: String::new(),
            animation_references: Vec::new(),
            physics: PhysicsParams::dynamic(0.5, 0.4),
        }
    }

    fn existing() -> ObjectRecord {
        ObjectRecord {
            id: ObjectId::new("o1"),
            display_name: "Sun".to_string(),
            model_reference: "SolarSystem_Sun".to_string(),
            description_text: "The Sun".to_string(),
            transform: Transform::IDENTITY,
            animation_references: vec!["glow".to_string()],
            physics: PhysicsParams::STATIC,
        }
    }

    #[test]
    fn test_idle_operations_are_noops() {
        let mut drag = DragController::new();
        assert!(!drag.is_active());
        assert!(drag.tick().is_none());
        assert!(!drag.update_transform(Transform::IDENTITY));
        assert!(drag.lock_in(None).is_none());
        assert!(drag.cancel().is_none());
    }

    #[test]
    fn test_second_begin_rejected() {
        let mut drag = DragController::new();
        let first = drag.begin_new(template(), Transform::IDENTITY).unwrap();
        let before = drag.state().clone();

        let err = drag.begin_existing(existing()).unwrap_err();
        assert!(matches!(err, SyncError::DragInProgress(ref id) if *id == first));
        assert_eq!(drag.state(), &before);
    }

    #[test]
    fn test_tick_reports_latest_transform() {
        let mut drag = DragController::new();
        let id = drag.begin_existing(existing()).unwrap();
        let moved = Transform::from_translation(0.3, 0.0, 0.0);
        assert!(drag.update_transform(moved));

        assert_eq!(
            drag.tick(),
            Some(WireMessage::AnimationFrame {
                object_id: id,
                transform: moved,
            })
        );
    }

    #[test]
    fn test_lock_in_new_object_uses_template() {
        let mut drag = DragController::new();
        let id = drag.begin_new(template(), Transform::IDENTITY).unwrap();
        let placed = Transform::from_translation(0.0, 0.0, -1.0);
        drag.update_transform(placed);

        let record = drag.lock_in(None).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.model_reference, "Block_Metal");
        assert_eq!(record.transform, placed);
        assert_eq!(record.physics, PhysicsParams::dynamic(0.5, 0.4));
        assert!(!drag.is_active());
    }

    #[test]
    fn test_lock_in_existing_keeps_metadata() {
        let mut drag = DragController::new();
        drag.begin_existing(existing()).unwrap();
        let moved = Transform::from_translation(1.0, 0.0, 0.0);
        drag.update_transform(moved);

        let record = drag.lock_in(Some(PhysicsParams::dynamic(2.0, 0.1))).unwrap();
        assert_eq!(record.id, ObjectId::new("o1"));
        assert_eq!(record.display_name, "Sun");
        assert_eq!(record.animation_references, vec!["glow".to_string()]);
        assert_eq!(record.transform, moved);
        assert_eq!(record.physics, PhysicsParams::dynamic(2.0, 0.1));
    }

    #[test]
    fn test_cancel_returns_session() {
        let mut drag = DragController::new();
        let id = drag.begin_new(template(), Transform::IDENTITY).unwrap();
        let session = drag.cancel().unwrap();
        assert_eq!(session.object_id(), &id);
        assert!(session.is_new_object());
        assert!(!drag.is_active());

        // A new drag can start afterwards
        drag.begin_existing(existing()).unwrap();
    }
}
