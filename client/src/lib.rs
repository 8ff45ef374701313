//! # Iris Client Library
//!
//! A headless client for the Iris hub. It speaks the wire protocol from the
//! `shared` crate and behaves like a minimal player: it authenticates, streams
//! state records at a fixed rate, optionally chats, and logs whatever the hub
//! sends back.
//!
//! It exists for manual testing of a running server and as the client side of
//! the workspace integration tests.
//!
//! ## Session Flow
//!
//! 1. `Auth` with the configured token
//! 2. The hub answers with an acceptance event carrying our player reference,
//!    or with a reason message followed by `Disconnect`
//! 3. State records go out every tick; authoritative snapshots come back and
//!    stale ones (sequence not newer than the last seen) are discarded
//! 4. `Disconnect` is sent on the way out
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         chat: Some("hello".to_string()),
//!         duration: Some(Duration::from_secs(10)),
//!         ..ClientConfig::default()
//!     };
//!
//!     let stats = Client::new(config).await?.run().await?;
//!     println!("Received {} snapshots", stats.snapshots);
//!     Ok(())
//! }
//! ```

pub mod network;
