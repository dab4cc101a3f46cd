use log::info;

use crate::blockchain::{MinerListener, Payload};

/// Observer of node events
///
/// All methods default to no-ops. A node without a listener behaves the same
/// as one with a listener that ignores everything.
pub trait NodeListener: Send + Sync {
    fn on_connect(&self, _address: &str) {}

    fn on_transaction(&self, _payload: &Payload) {}

    /// The chain was extended or replaced; `length` is the new length
    fn on_blockchain(&self, _length: usize) {}

    fn on_message(&self, _message: &str) {}

    /// Hook for collaborators that react to completed sales (receipts, labels)
    fn on_sale_completed(&self, _payload: &Payload) {}
}

/// Listener that writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl NodeListener for LogListener {
    fn on_connect(&self, address: &str) {
        info!("Connected to peer {}", address);
    }

    fn on_transaction(&self, payload: &Payload) {
        info!("New pending transaction {}", payload.digest());
    }

    fn on_blockchain(&self, length: usize) {
        info!("Chain changed, length is now {}", length);
    }

    fn on_message(&self, message: &str) {
        info!("{}", message);
    }

    fn on_sale_completed(&self, payload: &Payload) {
        info!("Sale completed for {}", payload.digest());
    }
}

impl MinerListener for LogListener {
    fn on_start_mining(&self, message: &[u8], difficulty: u32) {
        info!(
            "Mining {} header bytes at difficulty {}",
            message.len(),
            difficulty
        );
    }

    fn on_stop_mining(&self, nonce: u64) {
        info!("Mining stopped by nonce {}", nonce);
    }

    fn on_nonce_found(&self, nonce: u64) {
        info!("Nonce found: {}", nonce);
    }
}
