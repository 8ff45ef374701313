//! Connection registry: the bijection between transport connections and players
//!
//! Players live in an arena of slots. A [`PlayerRef`] names a slot together
//! with the generation it was issued under, so a reference kept after its
//! player left can never resolve to whoever reuses the slot. A separate
//! handle table maps live connections into the arena.
//!
//! The registry is owned and mutated by the network thread alone.

use crate::transport::ConnectionHandle;
use log::info;
use shared::PlayerRef;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} is already mapped to a player")]
    AlreadyConnected(ConnectionHandle),
    #[error("server full ({0} players)")]
    Full(usize),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    handle: Option<ConnectionHandle>,
}

pub struct ConnectionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    handles: HashMap<ConnectionHandle, PlayerRef>,
    max_players: usize,
}

impl ConnectionRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            handles: HashMap::new(),
            max_players,
        }
    }

    /// Allocates a player for `handle` and installs both directions of the mapping.
    pub fn on_connect(&mut self, handle: ConnectionHandle) -> Result<PlayerRef, RegistryError> {
        if self.handles.contains_key(&handle) {
            return Err(RegistryError::AlreadyConnected(handle));
        }
        if self.handles.len() >= self.max_players {
            return Err(RegistryError::Full(self.max_players));
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    handle: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.handle = Some(handle);
        let player = PlayerRef::new(index, slot.generation);
        self.handles.insert(handle, player);

        info!("{} mapped to {}", handle, player);
        Ok(player)
    }

    /// Removes both directions of the mapping. Unknown handles are ignored.
    pub fn on_disconnect(&mut self, handle: ConnectionHandle) -> Option<PlayerRef> {
        let player = self.handles.remove(&handle)?;

        let slot = &mut self.slots[player.index() as usize];
        slot.handle = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(player.index());

        info!("{} released {}", handle, player);
        Some(player)
    }

    pub fn resolve(&self, handle: ConnectionHandle) -> Option<PlayerRef> {
        self.handles.get(&handle).copied()
    }

    pub fn reverse(&self, player: PlayerRef) -> Option<ConnectionHandle> {
        self.slots
            .get(player.index() as usize)
            .filter(|slot| slot.generation == player.generation())
            .and_then(|slot| slot.handle)
    }

    pub fn contains(&self, player: PlayerRef) -> bool {
        self.reverse(player).is_some()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn players(&self) -> Vec<(ConnectionHandle, PlayerRef)> {
        self.handles
            .iter()
            .map(|(handle, player)| (*handle, *player))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handle(id: u64) -> ConnectionHandle {
        ConnectionHandle(id)
    }

    fn assert_bijection(registry: &ConnectionRegistry) {
        let mut seen = HashSet::new();
        for (h, player) in registry.players() {
            assert!(seen.insert(player), "{} issued twice", player);
            assert_eq!(registry.resolve(h), Some(player));
            assert_eq!(registry.reverse(player), Some(h));
        }
        let occupied = registry.slots.iter().filter(|s| s.handle.is_some()).count();
        assert_eq!(occupied, registry.len());
    }

    #[test]
    fn test_connect_allocates_player() {
        let mut registry = ConnectionRegistry::new(4);
        let player = registry.on_connect(handle(1)).unwrap();

        assert_eq!(registry.resolve(handle(1)), Some(player));
        assert_eq!(registry.reverse(player), Some(handle(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connect_same_handle_twice() {
        let mut registry = ConnectionRegistry::new(4);
        let player = registry.on_connect(handle(1)).unwrap();

        assert_eq!(
            registry.on_connect(handle(1)),
            Err(RegistryError::AlreadyConnected(handle(1)))
        );
        assert_eq!(registry.resolve(handle(1)), Some(player));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut registry = ConnectionRegistry::new(1);
        registry.on_connect(handle(1)).unwrap();
        assert_eq!(registry.on_connect(handle(2)), Err(RegistryError::Full(1)));
        assert_eq!(registry.resolve(handle(2)), None);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut registry = ConnectionRegistry::new(4);
        let player = registry.on_connect(handle(1)).unwrap();

        assert_eq!(registry.on_disconnect(handle(1)), Some(player));
        assert_eq!(registry.on_disconnect(handle(1)), None);
        assert_eq!(registry.on_disconnect(handle(99)), None);
        assert!(registry.is_empty());
        assert_eq!(registry.reverse(player), None);
    }

    #[test]
    fn test_reused_slot_does_not_alias_stale_ref() {
        let mut registry = ConnectionRegistry::new(4);
        let old = registry.on_connect(handle(1)).unwrap();
        registry.on_disconnect(handle(1));

        let new = registry.on_connect(handle(2)).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert_eq!(registry.reverse(old), None);
        assert_eq!(registry.reverse(new), Some(handle(2)));
        assert!(!registry.contains(old));
    }

    #[test]
    fn test_unknown_player_ref() {
        let registry = ConnectionRegistry::new(4);
        assert_eq!(registry.reverse(PlayerRef::new(17, 0)), None);
    }

    #[test]
    fn test_bijection_under_churn() {
        let mut registry = ConnectionRegistry::new(8);
        let mut next = 0u64;
        let mut live: Vec<ConnectionHandle> = Vec::new();

        // Deterministic mix of connects, disconnects and duplicate attempts
        for step in 0..500u64 {
            match step % 7 {
                0 | 1 | 3 | 5 => {
                    next += 1;
                    if registry.on_connect(handle(next)).is_ok() {
                        live.push(handle(next));
                    }
                }
                2 | 4 => {
                    if !live.is_empty() {
                        let victim = live.remove((step as usize * 31) % live.len());
                        assert!(registry.on_disconnect(victim).is_some());
                    }
                }
                _ => {
                    if let Some(h) = live.first() {
                        assert!(registry.on_connect(*h).is_err());
                    }
                    registry.on_disconnect(handle(10_000 + step));
                }
            }
            assert_bijection(&registry);
            assert_eq!(registry.len(), live.len());
        }
    }
}
