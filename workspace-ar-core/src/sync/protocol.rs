//! Sync Protocol Messages
//!
//! Shared data model and the wire codec. Every blob on the wire is a
//! versioned envelope around exactly one tagged [`WireMessage`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Current wire protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Default upper bound for an inbound blob (bytes)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Peer identifier as reported by the transport
pub type PeerId = String;

/// Globally unique object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh random id for a locally created object
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 4x4 transform in the shared root space
///
/// Stored as 16 floats in the same element order the scene layer uses
/// (`m11, m12, ... m44`), so elements 12..15 hold the translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform(pub [f32; 16]);

impl Transform {
    pub const IDENTITY: Transform = Transform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Pure translation
    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY.0;
        m[12] = x;
        m[13] = y;
        m[14] = z;
        Transform(m)
    }

    /// Build from a flat slice, `None` unless it has exactly 16 elements
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let m: [f32; 16] = values.try_into().ok()?;
        Some(Transform(m))
    }

    pub fn translation(&self) -> [f32; 3] {
        [self.0[12], self.0[13], self.0[14]]
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0.to_vec()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Screen-space calibration point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPoint {
    pub x: f64,
    pub y: f64,
}

impl AlignmentPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Physical parameters handed through to the physics layer untouched
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsParams {
    /// Mass in kg, `<= 0` means static
    pub mass: f64,
    /// Bounciness
    pub restitution: f64,
}

impl PhysicsParams {
    pub const STATIC: PhysicsParams = PhysicsParams {
        mass: 0.0,
        restitution: 0.0,
    };

    pub fn dynamic(mass: f64, restitution: f64) -> Self {
        Self { mass, restitution }
    }

    /// Static (immovable) bodies carry no positive mass
    pub fn is_static(&self) -> bool {
        self.mass <= 0.0
    }
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self::STATIC
    }
}

/// A placed object, the unit of replication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Assigned once by the creating device
    pub id: ObjectId,
    /// Name shown in the UI
    pub display_name: String,
    /// Model asset the scene layer loads
    pub model_reference: String,
    /// Description shown in the UI
    pub description_text: String,
    /// Placement in the shared root space
    pub transform: Transform,
    /// Named animation clips (opaque here)
    pub animation_references: Vec<String>,
    /// Physical parameters (opaque here)
    pub physics: PhysicsParams,
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WireMessage {
    /// Full alignment point set (host only)
    AlignmentSet { points: Vec<AlignmentPoint> },

    /// One complete object record, authoritative
    ObjectRecord(ObjectRecord),

    /// Live transform of an object being dragged, preview only
    AnimationFrame {
        object_id: ObjectId,
        transform: Transform,
    },
}

impl WireMessage {
    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::AlignmentSet { .. } => "alignment_set",
            WireMessage::ObjectRecord(_) => "object_record",
            WireMessage::AnimationFrame { .. } => "animation_frame",
        }
    }
}

/// Reasons an inbound blob is dropped
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    version: u16,
    message: &'a WireMessage,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    version: u16,
    message: serde_json::Value,
}

/// Serialize a message into a wire blob
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&OutgoingEnvelope {
        version: PROTOCOL_VERSION,
        message,
    })
}

/// Parse a wire blob
///
/// The version is checked before the body so that a newer peer's messages
/// are reported as such rather than as garbage.
pub fn decode(data: &[u8], max_len: usize) -> Result<WireMessage, DecodeError> {
    if data.len() > max_len {
        return Err(DecodeError::TooLarge {
            size: data.len(),
            max: max_len,
        });
    }

    let envelope: IncomingEnvelope = serde_json::from_slice(data)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(envelope.version));
    }

    Ok(serde_json::from_value(envelope.message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ObjectRecord {
        ObjectRecord {
            id: ObjectId::new("o1"),
            display_name: "Wood".to_string(),
            model_reference: "Block_Wood".to_string(),
            description_text: String::new(),
            transform: Transform::from_translation(0.1, 0.0, -0.5),
            animation_references: vec!["spin".to_string()],
            physics: PhysicsParams::dynamic(0.5, 0.4),
        }
    }

    #[test]
    fn test_object_record_survives_the_wire() {
        let msg = WireMessage::ObjectRecord(sample_record());
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes, DEFAULT_MAX_MESSAGE_BYTES).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_kind_tag_is_explicit() {
        let msg = WireMessage::AnimationFrame {
            object_id: ObjectId::new("o1"),
            transform: Transform::IDENTITY,
        };
        let value: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(value["version"], PROTOCOL_VERSION);
        assert_eq!(value["message"]["kind"], "animation_frame");
        assert_eq!(value["message"]["payload"]["object_id"], "o1");
    }

    #[test]
    fn test_alignment_set_decodes_to_points() {
        let raw = br#"{"version":1,"message":{"kind":"alignment_set","payload":{"points":[{"x":10.0,"y":20.0},{"x":30.0,"y":40.0}]}}}"#;
        match decode(raw, DEFAULT_MAX_MESSAGE_BYTES).unwrap() {
            WireMessage::AlignmentSet { points } => {
                assert_eq!(points, vec![AlignmentPoint::new(10.0, 20.0), AlignmentPoint::new(30.0, 40.0)]);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let raw = br#"{"version":1,"message":{"kind":"teleport","payload":{}}}"#;
        assert!(matches!(
            decode(raw, DEFAULT_MAX_MESSAGE_BYTES),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode(b"\x00\x01not json", DEFAULT_MAX_MESSAGE_BYTES),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let raw = br#"{"version":7,"message":{"kind":"whatever"}}"#;
        assert!(matches!(
            decode(raw, DEFAULT_MAX_MESSAGE_BYTES),
            Err(DecodeError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_oversized_blob_rejected() {
        let bytes = encode(&WireMessage::ObjectRecord(sample_record())).unwrap();
        assert!(matches!(
            decode(&bytes, 16),
            Err(DecodeError::TooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn test_transform_helpers() {
        let t = Transform::from_translation(1.0, 2.0, 3.0);
        assert_eq!(t.translation(), [1.0, 2.0, 3.0]);
        assert_eq!(Transform::from_slice(&t.to_vec()), Some(t));
        assert_eq!(Transform::from_slice(&[0.0; 15]), None);
    }

    #[test]
    fn test_static_physics() {
        assert!(PhysicsParams::STATIC.is_static());
        assert!(PhysicsParams::dynamic(-1.0, 0.2).is_static());
        assert!(!PhysicsParams::dynamic(0.5, 0.4).is_static());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ObjectId::generate(), ObjectId::generate());
    }
}
