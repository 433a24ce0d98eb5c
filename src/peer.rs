use std::net::SocketAddr;

/// A control-plane peer in the same region, as reported by the external membership module.
///
/// `id` is the peer's stable identity (independent of its currently advertised address) and is
/// what the locator uses to exclude itself from fan-out — comparing identities rather than
/// address strings means a peer whose address is rewritten behind a load balancer is never
/// mistaken for self, and self is never missed because of a stale address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerServer {
    pub id: String,
    pub addr: SocketAddr,
    pub major_version: u32,
    pub region: String,
    pub is_self: bool,
}

/// External collaborator supplying the current peer list. The locator takes a snapshot at the
/// start of each call and does not observe membership changes mid-fan-out.
pub trait PeerDirectory: Send + Sync {
    fn snapshot(&self) -> Vec<PeerServer>;
}

/// Fixed-membership [`PeerDirectory`] used in tests and in deployments where membership is
/// supplied once at startup rather than tracked live.
pub struct StaticPeerDirectory {
    peers: Vec<PeerServer>,
}

impl StaticPeerDirectory {
    /// Builds the directory, marking the entry whose `id` matches `local_id` as `is_self`,
    /// overriding whatever the caller passed in `PeerServer::is_self` for that entry.
    pub fn new(mut peers: Vec<PeerServer>, local_id: &str) -> Self {
        for peer in &mut peers {
            peer.is_self = peer.id == local_id;
        }
        Self { peers }
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn snapshot(&self) -> Vec<PeerServer> {
        self.peers.clone()
    }
}
