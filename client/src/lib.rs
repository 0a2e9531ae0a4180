//! # Poll Relay Terminal Client
//!
//! This library provides a terminal viewer for the poll relay. It joins the relay
//! as one player, shows chat from other viewers, lists open polls with their
//! remaining time, casts votes and prints each poll's result when it closes.
//!
//! ## Behaviour
//!
//! ### Joining
//! Every new connection starts with a `join` carrying the player id, so the relay
//! replays any poll this player has not voted in yet. If the connection drops the
//! client waits for the reconnect delay and joins again; replayed polls it
//! already knows are not shown twice.
//!
//! ### Voting
//! The client keeps its own record of the polls it voted in and refuses a second
//! vote locally before anything is sent.
//!
//! ### Filtering
//! Messages from the system player and control messages such as `systemstart`
//! are never printed.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Parses typed lines into commands and stamps outgoing messages.
//!
//! ### Polls Module (`polls`)
//! Local view of open polls, votes cast and stale poll cleanup.
//!
//! ### Rendering Module (`rendering`)
//! Formats chat, polls and closures as terminal lines.
//!
//! ### Network Module (`network`)
//! Connection, join, reconnect and the session event loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("ws://127.0.0.1:3000/", "1234", Duration::from_secs(1));
//!     client.run().await
//! }
//! ```

pub mod input;
pub mod network;
pub mod polls;
pub mod rendering;
