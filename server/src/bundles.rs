//! Records handed between the network thread and the simulation thread

use shared::{PlayerRef, Snapshot};
use std::collections::BTreeMap;

/// One tick of player state.
///
/// Inbound bundles are assembled by the hub from client State packets;
/// outbound bundles are authored by the simulation and broadcast. A single
/// instance only ever travels one way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBundle {
    /// Inbound: every active player contributed. Outbound: safe to broadcast.
    pub ready: bool,
    pub users: usize,
    pub sequence: u64,
    pub states: BTreeMap<PlayerRef, Vec<u8>>,
}

impl StateBundle {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            sequence: self.sequence,
            users: self.users as u32,
            states: self.states.clone(),
        }
    }
}

/// A discrete action from one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBundle {
    pub user_ref: PlayerRef,
    pub tag: u8,
    pub payload: Vec<u8>,
}

/// One chat line from one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBundle {
    pub user_ref: PlayerRef,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_carries_bundle_fields() {
        let mut bundle = StateBundle::new(9);
        bundle.users = 2;
        bundle.ready = true;
        bundle.states.insert(PlayerRef::new(1, 0), vec![4, 2]);

        let snapshot = bundle.to_snapshot();
        assert_eq!(snapshot.sequence, 9);
        assert_eq!(snapshot.users, 2);
        assert_eq!(snapshot.states.get(&PlayerRef::new(1, 0)), Some(&vec![4, 2]));
    }

    #[test]
    fn test_new_bundle_is_empty_and_not_ready() {
        let bundle = StateBundle::new(3);
        assert!(bundle.is_empty());
        assert!(!bundle.ready);
        assert_eq!(bundle.users, 0);
    }
}
