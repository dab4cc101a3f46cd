// Network module
//
// This module connects ledger nodes to each other:
// - Peer client and connector traits
// - Node listener hooks
// - The network node with gossip and chain reconciliation
// - HTTP and in-process transports

pub mod http;
pub mod listener;
pub mod local;
pub mod node;
pub mod peer;

// Re-export main components for easier access
pub use http::{HttpConnector, HttpPeer};
pub use listener::{LogListener, NodeListener};
pub use local::LocalNetwork;
pub use node::{NetworkNode, NodeError};
pub use peer::{PeerClient, PeerConnector, PeerError, PeerHandle, Reconciliation};
