//! # Poll Relay Server Library
//!
//! This library provides the relay server behind the live-show poll page. Clients
//! hold one websocket each; anything a client sends is relayed to every other
//! client, and a small set of typed messages drive time-bounded polls whose
//! results are announced to everyone when they close.
//!
//! ## Core Responsibilities
//!
//! ### Relay
//! Every inbound frame is forwarded unchanged to all other open connections.
//! Delivery is best effort: a connection that is closed or has a full outbound
//! queue is skipped for that frame, and nothing is retried.
//!
//! ### Polls
//! A `poll` message creates a poll with all counters at zero, `vote` messages
//! count at most one ballot per player, and `join` replays the polls a player has
//! not voted in yet, privately to that player.
//!
//! ### Closure
//! Each poll closes at its end time. The option with the most votes wins, ties
//! are broken uniformly at random, and a `voteClosure` with the final tallies is
//! broadcast to every connection.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! Connection tasks and expiry timers only send [`network::ServerEvent`]s. The
//! main loop owns the connection registry and the poll store outright and applies
//! events one at a time, which serializes every mutation without locks.
//!
//! ### Per-Connection Writers
//! Each connection has a bounded outbound queue drained by its own writer task,
//! so a slow peer never delays delivery to anyone else.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Connection membership, capacity and fan-out.
//!
//! ### Poll Store Module (`poll_store`)
//! Active polls, ballots and public poll views.
//!
//! ### Lifecycle Module (`lifecycle`)
//! Expiry timers, winner resolution and closure broadcast.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Per-message classification, poll side effects and relay.
//!
//! ### Network Module (`network`)
//! Websocket accept loop, per-connection tasks and the main event loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 3000,
//!         ..ServerConfig::default()
//!     };
//!
//!     let mut server = Server::new(&config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod lifecycle;
pub mod network;
pub mod poll_store;
pub mod registry;
