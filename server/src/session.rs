//! Per-connection lifecycle tracking
//!
//! Each transport connection walks `Connecting → Authenticated → Active →
//! Disconnecting → Closed`. A session is dropped from the table once it
//! reaches `Closed`, so the table only ever holds the first four states.

use crate::transport::ConnectionHandle;
use shared::PlayerRef;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport peer known, no accepted Auth yet
    Connecting,
    /// Auth accepted and a player allocated
    Authenticated,
    /// First valid state packet received; included in broadcasts
    Active,
    /// Being torn down; receives and sends nothing
    Disconnecting,
    Closed,
}

/// Why a connection is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    Timeout,
    ProtocolViolation,
    TransportError,
    Kicked,
    Shutdown,
}

impl DisconnectReason {
    /// Single byte carried in the payload of a disconnect event.
    pub fn code(self) -> u8 {
        match self {
            DisconnectReason::Requested => 0,
            DisconnectReason::Timeout => 1,
            DisconnectReason::ProtocolViolation => 2,
            DisconnectReason::TransportError => 3,
            DisconnectReason::Kicked => 4,
            DisconnectReason::Shutdown => 5,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub handle: ConnectionHandle,
    pub state: ConnectionState,
    pub player: Option<PlayerRef>,
    /// Last time we received any datagram on this connection
    pub last_seen: Instant,
    /// Malformed packets received so far
    pub decode_errors: u32,
}

impl Session {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            state: ConnectionState::Connecting,
            player: None,
            last_seen: Instant::now(),
            decode_errors: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Disconnecting sessions take no further part in traffic.
    pub fn is_live(&self) -> bool {
        !matches!(
            self.state,
            ConnectionState::Disconnecting | ConnectionState::Closed
        )
    }
}

#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<ConnectionHandle, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `handle`, opening a `Connecting` one if needed.
    pub fn open(&mut self, handle: ConnectionHandle) -> &mut Session {
        self.sessions
            .entry(handle)
            .or_insert_with(|| Session::new(handle))
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&Session> {
        self.sessions.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut Session> {
        self.sessions.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<Session> {
        self.sessions.remove(&handle)
    }

    pub fn state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        self.sessions.get(&handle).map(|s| s.state)
    }

    /// Handles of every `Active` connection at this instant.
    pub fn active(&self) -> Vec<ConnectionHandle> {
        let mut handles: Vec<ConnectionHandle> = self
            .sessions
            .values()
            .filter(|s| s.state == ConnectionState::Active)
            .map(|s| s.handle)
            .collect();
        handles.sort();
        handles
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state == ConnectionState::Active)
            .count()
    }

    /// Live sessions that have been silent longer than `timeout`.
    pub fn timed_out(&self, timeout: Duration) -> Vec<ConnectionHandle> {
        self.sessions
            .values()
            .filter(|s| s.is_live() && s.is_timed_out(timeout))
            .map(|s| s.handle)
            .collect()
    }

    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_connecting() {
        let session = Session::new(ConnectionHandle(1));
        assert_eq!(session.state, ConnectionState::Connecting);
        assert!(session.player.is_none());
        assert_eq!(session.decode_errors, 0);
        assert!(session.is_live());
    }

    #[test]
    fn test_disconnect_codes_are_distinct() {
        let reasons = [
            DisconnectReason::Requested,
            DisconnectReason::Timeout,
            DisconnectReason::ProtocolViolation,
            DisconnectReason::TransportError,
            DisconnectReason::Kicked,
            DisconnectReason::Shutdown,
        ];
        let mut codes: Vec<u8> = reasons.iter().map(|r| r.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), reasons.len());
    }

    #[test]
    fn test_session_timeout() {
        let mut session = Session::new(ConnectionHandle(1));
        assert!(!session.is_timed_out(Duration::from_secs(1)));

        session.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(session.is_timed_out(Duration::from_secs(1)));

        session.touch();
        assert!(!session.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut table = SessionTable::new();
        table.open(ConnectionHandle(1)).state = ConnectionState::Authenticated;
        let session = table.open(ConnectionHandle(1));
        assert_eq!(session.state, ConnectionState::Authenticated);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_active_excludes_other_states() {
        let mut table = SessionTable::new();
        table.open(ConnectionHandle(1)).state = ConnectionState::Active;
        table.open(ConnectionHandle(2)).state = ConnectionState::Disconnecting;
        table.open(ConnectionHandle(3)).state = ConnectionState::Authenticated;
        table.open(ConnectionHandle(4)).state = ConnectionState::Active;

        assert_eq!(
            table.active(),
            vec![ConnectionHandle(1), ConnectionHandle(4)]
        );
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn test_timed_out_skips_disconnecting() {
        let mut table = SessionTable::new();
        let stale = Instant::now() - Duration::from_secs(10);

        let a = table.open(ConnectionHandle(1));
        a.last_seen = stale;
        let b = table.open(ConnectionHandle(2));
        b.last_seen = stale;
        b.state = ConnectionState::Disconnecting;
        table.open(ConnectionHandle(3));

        assert_eq!(
            table.timed_out(Duration::from_secs(5)),
            vec![ConnectionHandle(1)]
        );
    }
}
