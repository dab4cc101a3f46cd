//! Proof-of-work ledger for supply-chain custody records.
//!
//! Nodes keep a hash-linked chain of blocks whose payloads are committed
//! through a Merkle tree, race to mine pending payloads in parallel and
//! gossip transactions, blocks and chains to their peers.

pub mod api;
pub mod blockchain;
pub mod config;
pub mod network;
