use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use super::peer::{PeerClient, PeerConnector, PeerError, Reconciliation};
use crate::api::schema::{
    AckResponse, AddressResponse, ChainResponse, LengthResponse, PeerRequest, ReconcileResponse,
    StartMiningRequest, StopMiningRequest, TransactionRequest,
};
use crate::blockchain::{Block, MiningStatus, Payload};

/// Connects to peers over the node's HTTP API
///
/// All peer clients share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    /// Creates a connector whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpConnector { client })
    }
}

impl PeerConnector for HttpConnector {
    fn connect(&self, address: &str) -> Arc<dyn PeerClient> {
        Arc::new(HttpPeer::new(self.client.clone(), address))
    }
}

/// Client for one peer reachable at a base URL
#[derive(Debug, Clone)]
pub struct HttpPeer {
    address: String,
    client: Client,
}

impl HttpPeer {
    pub fn new(client: Client, address: &str) -> Self {
        HttpPeer {
            address: address.to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.address.trim_end_matches('/'), path)
    }

    /// Sends `request` and decodes the JSON answer
    ///
    /// Transport failures and server errors mean the peer is unavailable;
    /// client errors and undecodable answers mean it refused the request.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, PeerError> {
        let response = request
            .send()
            .await
            .map_err(|err| PeerError::unavailable(&self.address, err))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(PeerError::rejected(&self.address, format!("{} {}", status, body)));
        }
        if !status.is_success() {
            return Err(PeerError::unavailable(&self.address, status));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| PeerError::rejected(&self.address, err))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PeerError> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn ack(&self, request: RequestBuilder) -> Result<(), PeerError> {
        self.send::<AckResponse>(request).await.map(|_| ())
    }
}

#[async_trait]
impl PeerClient for HttpPeer {
    async fn address(&self) -> Result<String, PeerError> {
        let response: AddressResponse = self.get("/address").await?;
        Ok(response.address)
    }

    async fn add_peer(&self, address: &str) -> Result<(), PeerError> {
        let body = PeerRequest {
            address: address.to_string(),
        };
        self.ack(self.client.post(self.url("/peers")).json(&body)).await
    }

    async fn list_peers(&self) -> Result<Vec<String>, PeerError> {
        self.get("/peers").await
    }

    async fn submit_transaction(&self, payload: &Payload) -> Result<(), PeerError> {
        let body = TransactionRequest {
            payload: payload.clone(),
        };
        self.ack(self.client.post(self.url("/transactions")).json(&body))
            .await
    }

    async fn list_transactions(&self) -> Result<Vec<Payload>, PeerError> {
        self.get("/transactions").await
    }

    async fn start_mining(&self, message: &str, difficulty: u32) -> Result<(), PeerError> {
        let body = StartMiningRequest {
            message: Some(message.to_string()),
            difficulty,
        };
        self.ack(self.client.post(self.url("/mining/start")).json(&body))
            .await
    }

    async fn stop_mining(&self, nonce: u64) -> Result<(), PeerError> {
        let body = StopMiningRequest { nonce };
        self.ack(self.client.post(self.url("/mining/stop")).json(&body))
            .await
    }

    async fn mining_status(&self) -> Result<MiningStatus, PeerError> {
        self.get("/mining/status").await
    }

    async fn accept_block(&self, block: &Block) -> Result<(), PeerError> {
        self.ack(self.client.post(self.url("/blocks")).json(block)).await
    }

    async fn chain_length(&self) -> Result<usize, PeerError> {
        let response: LengthResponse = self.get("/chain/length").await?;
        Ok(response.length)
    }

    async fn last_block(&self) -> Result<Block, PeerError> {
        self.get("/chain/last").await
    }

    async fn chain(&self) -> Result<Vec<Block>, PeerError> {
        let response: ChainResponse = self.get("/chain").await?;
        Ok(response.chain)
    }

    async fn replace_chain(&self, blocks: &[Block]) -> Result<(), PeerError> {
        self.ack(self.client.put(self.url("/chain")).json(blocks)).await
    }

    async fn reconcile(&self, address: &str) -> Result<Reconciliation, PeerError> {
        let body = PeerRequest {
            address: address.to_string(),
        };
        let response: ReconcileResponse = self
            .send(self.client.post(self.url("/reconcile")).json(&body))
            .await?;
        Ok(response.outcome)
    }

    async fn registered_transactions(&self) -> Result<Vec<Payload>, PeerError> {
        self.get("/transactions/registered").await
    }
}
