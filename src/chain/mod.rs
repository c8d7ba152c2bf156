//! Betting contract access.
//!
//! - `abi`: `sol!` interface and event topic hashes
//! - `reader`: the `ChainReader` seam and its JSON-RPC implementation
//! - `types`: status codes, team rows, raw logs and the poll cursor

pub mod abi;
pub mod reader;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use reader::{ChainReader, RpcChainReader};
pub use types::{ChainError, ChainGlobalState, Cursor, EventBatch, GameStatus, RawEvent, TeamInfo};
