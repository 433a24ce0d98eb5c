use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    clock::{Clock, SystemClock, Timestamp},
    session::Session,
    worker_id::WorkerId,
};

const LOG_TARGET: &str = "fabric::registry";

/// Context attached to an inbound transport handshake.
///
/// Carries the peer's [`WorkerId`] (`None` if the peer is not a worker — another server, or a
/// CLI) and the [`Session`] bound to that transport.
#[derive(Clone)]
pub struct RpcContext {
    pub worker_id: Option<WorkerId>,
    pub session: Arc<dyn Session>,
}

impl RpcContext {
    pub fn new(worker_id: Option<WorkerId>, session: Arc<dyn Session>) -> Self {
        Self { worker_id, session }
    }
}

/// `{ session, established_at }`, immutable once inserted and replaced wholesale on reconnect.
#[derive(Clone)]
pub struct NodeConnState {
    pub session: Arc<dyn Session>,
    pub established_at: Timestamp,
}

/// In-memory `WorkerId -> NodeConnState` table, the only shared mutable state in the fabric's
/// core.
///
/// Backed by a single readers-writer lock whose critical sections hold no I/O (per the
/// concurrency model): readers (`get`, `snapshot`) take shared access, writers (`add`, `remove`)
/// take exclusive access. In a deployment with enough workers that lock contention becomes
/// visible, sharding by `WorkerId` hash into independently-locked buckets preserves every
/// invariant here and is a drop-in substitute.
pub struct NodeConnRegistry {
    inner: RwLock<HashMap<WorkerId, NodeConnState>>,
    clock: Box<dyn Clock>,
}

impl Default for NodeConnRegistry {
    fn default() -> Self {
        Self::new(Box::new(SystemClock))
    }
}

impl NodeConnRegistry {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self { inner: RwLock::new(HashMap::new()), clock }
    }

    /// Read-only lookup. Many concurrent readers proceed without blocking each other or new
    /// inserts unreasonably.
    pub fn get(&self, worker_id: &WorkerId) -> Option<NodeConnState> {
        self.inner.read().get(worker_id).cloned()
    }

    /// Returns a copy of the current `WorkerId -> established_at` map, taken under a read lock.
    /// Subsequent mutations never affect the returned copy.
    pub fn snapshot(&self) -> HashMap<WorkerId, Timestamp> {
        self.inner
            .read()
            .iter()
            .map(|(id, state)| (id.clone(), state.established_at))
            .collect()
    }

    /// If `ctx` carries a non-empty `WorkerId`, overwrites the registry entry for that worker
    /// with `ctx`'s session and the current time. No-op otherwise.
    ///
    /// Overwrite is correct because a new inbound session supersedes the old one; the old
    /// session is expected to be closed by the transport layer, not by the registry.
    pub fn add(&self, ctx: &RpcContext) {
        let Some(worker_id) = &ctx.worker_id else {
            return;
        };
        let established_at = self.clock.now();
        let mut guard = self.inner.write();
        tracing::debug!(target: LOG_TARGET, worker_id = %worker_id, established_at, "registering node connection");
        guard.insert(
            worker_id.clone(),
            NodeConnState { session: ctx.session.clone(), established_at },
        );
    }

    /// Symmetric deletion guarded by the same emptiness check as [`Self::add`], and additionally
    /// guarded by session identity: a stale `remove` naming a session that is no longer the one
    /// on record for this worker is a no-op, so it cannot evict a newer `add`.
    pub fn remove(&self, ctx: &RpcContext) {
        let Some(worker_id) = &ctx.worker_id else {
            return;
        };
        let mut guard = self.inner.write();
        if let Some(current) = guard.get(worker_id) {
            if !Arc::ptr_eq(&current.session, &ctx.session) {
                tracing::debug!(
                    target: LOG_TARGET,
                    worker_id = %worker_id,
                    "ignoring stale remove for a superseded session"
                );
                return;
            }
        }
        guard.remove(worker_id);
        tracing::debug!(target: LOG_TARGET, worker_id = %worker_id, "removed node connection");
    }
}
