//! Session State Management

use std::collections::HashSet;

use tracing::debug;

use super::protocol::PeerId;
use super::SyncError;

/// Where the local user is in the placement flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Looking for a surface to anchor on
    FindingPlane,
    /// Picking calibration points
    AlignmentStage,
    /// Placing and moving objects
    Creative,
}

/// Role picked by the local user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Unassigned,
    Host,
    Client,
}

/// Phase, role and peer membership of the local device
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: Phase,
    role: Role,
    connected_peers: HashSet<PeerId>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::FindingPlane,
            role: Role::Unassigned,
            connected_peers: HashSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Host that has finished picking alignment points
    pub fn may_broadcast_alignment(&self) -> bool {
        self.role == Role::Host && self.phase == Phase::Creative
    }

    /// Record a phase change. Never rejected, only noted when it goes backwards.
    pub fn set_phase(&mut self, phase: Phase) {
        if phase < self.phase {
            debug!("Phase moving backwards: {:?} -> {:?}", self.phase, phase);
        }
        self.phase = phase;
    }

    /// Pick the local role; only allowed while unassigned
    pub fn assign_role(&mut self, role: Role) -> Result<(), SyncError> {
        if self.role != Role::Unassigned && role != self.role {
            return Err(SyncError::RoleAlreadyAssigned(self.role));
        }
        self.role = role;
        Ok(())
    }

    pub fn connected_peers(&self) -> &HashSet<PeerId> {
        &self.connected_peers
    }

    /// Replace the membership wholesale.
    ///
    /// Returns the peers that were not known before, in the order given and
    /// without duplicates.
    pub fn replace_peers(&mut self, peers: &[PeerId]) -> Vec<PeerId> {
        let mut joined: Vec<PeerId> = Vec::new();
        for peer in peers {
            if !self.connected_peers.contains(peer) && !joined.contains(peer) {
                joined.push(peer.clone());
            }
        }
        self.connected_peers = peers.iter().cloned().collect();
        joined
    }

    /// Back to alignment with no role and no peers
    pub fn reset(&mut self) {
        self.phase = Phase::AlignmentStage;
        self.role = Role::Unassigned;
        self.connected_peers.clear();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(names: &[&str]) -> Vec<PeerId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_initial_state() {
        let state = SessionState::new();
        assert_eq!(state.phase(), Phase::FindingPlane);
        assert_eq!(state.role(), Role::Unassigned);
        assert!(state.connected_peers().is_empty());
    }

    #[test]
    fn test_phase_never_rejected() {
        let mut state = SessionState::new();
        state.set_phase(Phase::Creative);
        state.set_phase(Phase::FindingPlane);
        assert_eq!(state.phase(), Phase::FindingPlane);
    }

    #[test]
    fn test_role_picked_once() {
        let mut state = SessionState::new();
        state.assign_role(Role::Host).unwrap();
        // Picking the same role again is harmless
        state.assign_role(Role::Host).unwrap();
        assert!(matches!(
            state.assign_role(Role::Client),
            Err(SyncError::RoleAlreadyAssigned(Role::Host))
        ));
        assert!(state.is_host());
    }

    #[test]
    fn test_alignment_gate() {
        let mut state = SessionState::new();
        state.assign_role(Role::Host).unwrap();
        state.set_phase(Phase::AlignmentStage);
        assert!(!state.may_broadcast_alignment());
        state.set_phase(Phase::Creative);
        assert!(state.may_broadcast_alignment());

        let mut client = SessionState::new();
        client.assign_role(Role::Client).unwrap();
        client.set_phase(Phase::Creative);
        assert!(!client.may_broadcast_alignment());
    }

    #[test]
    fn test_replace_peers_reports_only_new() {
        let mut state = SessionState::new();
        assert_eq!(state.replace_peers(&peers(&["a", "b"])), peers(&["a", "b"]));
        assert_eq!(state.replace_peers(&peers(&["b", "c", "c"])), peers(&["c"]));
        assert_eq!(state.connected_peers().len(), 2);

        // "a" left earlier, so it counts as new again
        assert_eq!(state.replace_peers(&peers(&["a", "b", "c"])), peers(&["a"]));
        assert!(state.replace_peers(&peers(&["a", "b", "c"])).is_empty());
    }

    #[test]
    fn test_reset() {
        let mut state = SessionState::new();
        state.assign_role(Role::Client).unwrap();
        state.set_phase(Phase::Creative);
        state.replace_peers(&peers(&["a"]));

        state.reset();
        assert_eq!(state.phase(), Phase::AlignmentStage);
        assert_eq!(state.role(), Role::Unassigned);
        assert!(state.connected_peers().is_empty());
        state.assign_role(Role::Host).unwrap();
    }
}
