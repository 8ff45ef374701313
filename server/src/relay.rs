//! Relay simulation
//!
//! The simplest useful consumer of the hub: it keeps the last record each
//! player sent, rebroadcasts the whole table as the authoritative state once
//! per tick, and echoes chat to everyone. Runs on its own OS thread because
//! popping state bundles blocks.

use crate::bundles::{EventBundle, MessageBundle, StateBundle};
use crate::network::{HubError, IrisHandle, Recipient};
use log::{debug, info, warn};
use shared::{event_tag, PlayerRef};
use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Relay {
    iris: IrisHandle,
    tick: Duration,
    world: BTreeMap<PlayerRef, Vec<u8>>,
    next_sequence: u64,
}

impl Relay {
    pub fn new(iris: IrisHandle, tick_rate: u32) -> Self {
        Self {
            iris,
            tick: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
            world: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("relay".to_string())
            .spawn(move || self.run())
    }

    /// Runs until the hub closes its queues.
    pub fn run(mut self) {
        info!("Relay running at {:?} per tick", self.tick);

        loop {
            let inbound = match self.iris.pop_state_bundle_timeout(self.tick) {
                Ok(inbound) => inbound,
                Err(_) => break,
            };

            let mut changed = false;
            if let Some(bundle) = inbound {
                changed |= self.merge(bundle);
            }
            changed |= self.apply_events(self.iris.drain_events());
            self.relay_messages(self.iris.drain_messages());

            if changed {
                if let Err(e) = self.broadcast() {
                    debug!("Broadcast skipped: {}", e);
                }
            }
        }

        info!("Relay stopped after {} broadcasts", self.next_sequence);
    }

    fn merge(&mut self, bundle: StateBundle) -> bool {
        if !bundle.ready {
            debug!(
                "Inbound bundle {} is partial ({}/{} players)",
                bundle.sequence,
                bundle.states.len(),
                bundle.users
            );
        }
        let changed = !bundle.states.is_empty();
        self.world.extend(bundle.states);
        changed
    }

    fn apply_events(&mut self, events: Vec<EventBundle>) -> bool {
        let mut changed = false;
        for event in events {
            match event.tag {
                event_tag::DISCONNECTED => {
                    info!("{} left", event.user_ref);
                    changed |= self.world.remove(&event.user_ref).is_some();
                }
                tag => debug!(
                    "{} sent event {} ({} bytes)",
                    event.user_ref,
                    tag,
                    event.payload.len()
                ),
            }
        }
        changed
    }

    fn relay_messages(&self, messages: Vec<MessageBundle>) {
        for message in messages {
            let line = chat_line(&message);
            match self.iris.send_message(Recipient::Broadcast, line) {
                Ok(()) => {}
                Err(HubError::MessageTooLong { len, max }) => {
                    warn!(
                        "Not relaying message from {}: {} bytes with prefix, limit {}",
                        message.user_ref, len, max
                    );
                }
                Err(e) => debug!("Message relay skipped: {}", e),
            }
        }
    }

    fn broadcast(&mut self) -> Result<(), HubError> {
        let bundle = self.authoritative();
        self.next_sequence += 1;
        self.iris.broadcast_state(bundle)
    }

    /// Outbound bundle for the current world, marked ready.
    fn authoritative(&self) -> StateBundle {
        StateBundle {
            ready: true,
            users: self.world.len(),
            sequence: self.next_sequence,
            states: self.world.clone(),
        }
    }
}

fn chat_line(message: &MessageBundle) -> String {
    format!("{}: {}", message.user_ref, message.message)
}
