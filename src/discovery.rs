//! Peer Discovery Client
//!
//! Fetches the list of currently connected peers. The collector only needs
//! `list_peers`; how discovery tracks connections is not its concern.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::types::PeerRecord;

/// Source of the current peer list
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    async fn list_peers(&self) -> Result<Vec<PeerRecord>, DiscoveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Discovery transport error: {0}")]
    Transport(String),

    #[error("Discovery returned HTTP {0}")]
    Status(u16),

    #[error("Invalid peer list: {0}")]
    Decode(String),

    #[error("Discovery timed out after {0:?}")]
    Timeout(Duration),
}

/// Accepted response bodies: a bare array or `{ "peers": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum PeerListBody {
    List(Vec<PeerRecord>),
    Wrapped { peers: Vec<PeerRecord> },
}

impl PeerListBody {
    fn into_peers(self) -> Vec<PeerRecord> {
        match self {
            PeerListBody::List(peers) | PeerListBody::Wrapped { peers } => peers,
        }
    }
}

/// Parse a discovery response body
pub fn parse_peer_list(body: &str) -> Result<Vec<PeerRecord>, DiscoveryError> {
    serde_json::from_str::<PeerListBody>(body)
        .map(PeerListBody::into_peers)
        .map_err(|e| DiscoveryError::Decode(e.to_string()))
}

/// Discovery over HTTP (JSON peer list)
pub struct HttpPeerDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpPeerDiscovery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Transport(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PeerDiscovery for HttpPeerDiscovery {
    async fn list_peers(&self) -> Result<Vec<PeerRecord>, DiscoveryError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Transport(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DiscoveryError::Transport(format!("Read body failed: {}", e)))?;

        let peers = parse_peer_list(&body)?;
        debug!("Discovery at {} reported {} peers", self.url, peers.len());

        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_list() {
        let body = r#"[
            {"peerId": "QmA", "ip": "1.1.1.1", "latency": "20ms"},
            {"peerId": "QmB"}
        ]"#;

        let peers = parse_peer_list(body).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(peers[1].ip, None);
    }

    #[test]
    fn test_parse_wrapped_list() {
        let body = r#"{"peers": [{"peer_id": "QmA", "ip": null}]}"#;

        let peers = parse_peer_list(body).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "QmA");
        assert_eq!(peers[0].ip, None);
    }

    #[test]
    fn test_parse_invalid_body() {
        assert!(matches!(parse_peer_list("not json"), Err(DiscoveryError::Decode(_))));
        assert!(matches!(parse_peer_list(r#"[{"ip": "1.1.1.1"}]"#), Err(DiscoveryError::Decode(_))));
    }
}
