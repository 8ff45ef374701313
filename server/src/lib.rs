//! # Iris Server Library
//!
//! Iris is the network hub of a real-time multiplayer server. It multiplexes
//! every client connection on one datagram socket, decodes their packets into
//! bundles the game simulation can consume, and carries the simulation's
//! authoritative state back out to the clients.
//!
//! ## Core Responsibilities
//!
//! ### Connection Management
//! Handles the lifecycle of every client connection:
//! - Handshake validation and player allocation
//! - Mapping between transport connections and opaque player references
//! - Timeout detection, kicks and abuse handling
//! - Notifying the simulation when a player leaves
//!
//! ### Inbound Bundling
//! Client traffic is grouped by kind before the simulation sees it:
//! - State records are aggregated per tick into sequenced state bundles
//! - Events and chat messages are appended to drainable lists
//!
//! ### Outbound Delivery
//! State bundles submitted by the simulation are broadcast to every active
//! connection; events and messages can be targeted at a single player.
//!
//! ## Architecture Design
//!
//! ### Single Owner Network Loop
//! One async task owns the transport, the registry and the session table.
//! Nothing else mutates them. The simulation talks to the hub through an
//! [`IrisHandle`], whose send requests are executed on the network loop in
//! order with inbound traffic.
//!
//! ### Blocking Hand-off
//! The simulation typically runs on its own OS thread at a fixed tick rate
//! and blocks on [`IrisHandle::pop_state_bundle`]. Shutting the hub down
//! closes the queues, which releases that thread with [`QueueClosed`].
//!
//! ## Module Organization
//!
//! ### Transport Module (`transport`)
//! The datagram transport underneath the hub and the UDP implementation.
//!
//! ### Registry Module (`registry`)
//! Bijection between connection handles and player references.
//!
//! ### Session Module (`session`)
//! Per-connection state machine, liveness and abuse tracking.
//!
//! ### Queues and Bundles (`queues`, `bundles`)
//! The records handed to the simulation and the thread-safe structures that
//! carry them.
//!
//! ### Network Module (`network`)
//! The hub itself: receive loop, packet dispatch and delivery.
//!
//! ### Relay Module (`relay`)
//! A minimal simulation that echoes state and chat, used by the server binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{HubConfig, Iris, Relay};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut iris = Iris::bind(HubConfig::default()).await?;
//!
//!     // The simulation runs on its own thread and stops once the hub closes
//!     let relay = Relay::new(iris.handle(), 30).spawn()?;
//!
//!     iris.run().await?;
//!     let _ = relay.join();
//!     Ok(())
//! }
//! ```

pub mod bundles;
pub mod config;
pub mod diagnostics;
pub mod network;
pub mod queues;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transport;

pub use bundles::{EventBundle, MessageBundle, StateBundle};
pub use config::HubConfig;
pub use diagnostics::DiagnosticsSnapshot;
pub use network::{AuthError, HubError, Iris, IrisHandle, Recipient};
pub use queues::{QueueClosed, TryPushError};
pub use registry::{ConnectionRegistry, RegistryError};
pub use relay::Relay;
pub use session::{ConnectionState, DisconnectReason};
pub use transport::{ConnectionHandle, Transport, TransportEvent, UdpTransport};
