//! shardlake server and client library.
//!
//! Runs a leader metastore as a local Unix socket server. The server owns the
//! queue that runs deferred drop work and recovers its catalog from the
//! journal on start.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ShardlakeClient;
pub use server::ShardlakeServer;
