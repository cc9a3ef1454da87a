//! Shard RPC
//!
//! Architecture:
//! - [`ShardServer`]: wraps a local searcher (and optionally an index
//!   engine) and serves it over TCP
//! - [`RpcClient`]: connects per call, sends one request, reads one
//!   response; errors keep their kind across the wire
//! - `protocol`: length-prefixed JSON framing shared by both sides

mod client;
pub mod protocol;
mod shard;

pub use client::{IO_TIMEOUT, RpcClient};
pub use shard::{DEFAULT_CACHE_SIZE, DEFAULT_GRACE, ShardServer, ShardSettings};
