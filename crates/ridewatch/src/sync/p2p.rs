//! Peer-to-peer sync channel.
//!
//! The radio or pairing transport itself lives outside this crate behind
//! [`PeerLink`]. This module bounds each exchange in time and turns a
//! rejected send into a sync failure.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Channel;

use super::{SyncChannel, SyncPayload, SyncResponse};

/// Reply of a peer to one send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAck {
    /// Whether the peer accepted the payload.
    pub accepted: bool,
    /// Updates the peer returned with its acknowledgement.
    #[serde(default)]
    pub updates: SyncResponse,
}

/// A short-range link to nearby devices.
#[async_trait]
pub trait PeerLink: Send + Sync + std::fmt::Debug {
    /// Send a payload and wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error if no peer is reachable.
    async fn send(&self, payload: &SyncPayload) -> Result<PeerAck>;
}

/// Link used when no local transport exists; no peer is ever reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPeerLink;

#[async_trait]
impl PeerLink for NullPeerLink {
    async fn send(&self, _payload: &SyncPayload) -> Result<PeerAck> {
        Err(Error::sync(Channel::P2p, "no peer link available"))
    }
}

/// Syncs through a [`PeerLink`].
#[derive(Debug)]
pub struct PeerChannel<L> {
    link: L,
    timeout: Duration,
}

impl<L: PeerLink> PeerChannel<L> {
    /// Wrap a link; every exchange is bounded by `timeout`.
    #[must_use]
    pub fn new(link: L, timeout: Duration) -> Self {
        Self { link, timeout }
    }
}

#[async_trait]
impl<L: PeerLink> SyncChannel for PeerChannel<L> {
    fn channel(&self) -> Channel {
        Channel::P2p
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, payload: &SyncPayload) -> Result<SyncResponse> {
        let ack = tokio::time::timeout(self.timeout, self.link.send(payload))
            .await
            .map_err(|_| Error::timeout("peer exchange"))??;
        if !ack.accepted {
            return Err(Error::sync(Channel::P2p, "peer rejected payload"));
        }
        Ok(ack.updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::model::GroupMember;
    use crate::trip_config::Role;

    #[derive(Debug)]
    struct FixedLink(PeerAck);

    #[async_trait]
    impl PeerLink for FixedLink {
        async fn send(&self, _payload: &SyncPayload) -> Result<PeerAck> {
            Ok(self.0.clone())
        }
    }

    #[derive(Debug)]
    struct SlowLink;

    #[async_trait]
    impl PeerLink for SlowLink {
        async fn send(&self, _payload: &SyncPayload) -> Result<PeerAck> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PeerAck::default())
        }
    }

    fn payload() -> SyncPayload {
        SyncPayload {
            trip_id: "t".to_string(),
            role: Role::Driver,
            position: None,
            speed: None,
            group_members: Vec::new(),
            feedback_reports: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_accepted_ack_returns_updates() {
        let ack = PeerAck {
            accepted: true,
            updates: SyncResponse {
                group_members: vec![GroupMember::new("m1", "Ana")],
                feedback_reports: Vec::new(),
            },
        };
        let channel = PeerChannel::new(FixedLink(ack), Duration::from_secs(1));
        let response = channel.exchange(&payload()).await.unwrap();
        assert_eq!(response.group_members.len(), 1);
        assert_eq!(channel.channel(), Channel::P2p);
    }

    #[tokio::test]
    async fn test_rejected_ack_fails() {
        let channel = PeerChannel::new(FixedLink(PeerAck::default()), Duration::from_secs(1));
        let err = channel.exchange(&payload()).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_peer_times_out() {
        let channel = PeerChannel::new(SlowLink, Duration::from_secs(2));
        let err = channel.exchange(&payload()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_sync_failure());
    }

    #[tokio::test]
    async fn test_null_link_is_unreachable() {
        let channel = PeerChannel::new(NullPeerLink, Duration::from_secs(1));
        assert!(channel.exchange(&payload()).await.unwrap_err().is_sync_failure());
    }
}
