//! Counters the hub bumps as it drops or refuses traffic.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Diagnostics {
    packets_received: AtomicU64,
    decode_errors: AtomicU64,
    unknown_sender: AtomicU64,
    auth_rejections: AtomicU64,
    forced_disconnects: AtomicU64,
    broadcasts: AtomicU64,
    stale_broadcasts: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub packets_received: u64,
    pub decode_errors: u64,
    pub unknown_sender: u64,
    pub auth_rejections: u64,
    pub forced_disconnects: u64,
    pub broadcasts: u64,
    pub stale_broadcasts: u64,
}

impl Diagnostics {
    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_sender(&self) {
        self.unknown_sender.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_rejected(&self) {
        self.auth_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forced_disconnect(&self) {
        self.forced_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_broadcast(&self) {
        self.stale_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_sender: self.unknown_sender.load(Ordering::Relaxed),
            auth_rejections: self.auth_rejections.load(Ordering::Relaxed),
            forced_disconnects: self.forced_disconnects.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            stale_broadcasts: self.stale_broadcasts.load(Ordering::Relaxed),
        }
    }
}
