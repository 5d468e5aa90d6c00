//! Provider traits: the coordinator's view of its collaborators.
//!
//! The router, the relayer and the child payment workers live outside
//! this crate; the coordinator talks to them exclusively through these
//! traits. Tests substitute deterministic doubles.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::lifecycle::LifecycleEvent;
use crate::model::{ChildDescriptor, ChildId, ChildOutcome, NetworkStats, UsableBalance};
use crate::primitives::BlockHeight;

/// Channel on which a child worker reports its single terminal outcome.
pub type OutcomeSender = mpsc::UnboundedSender<ChildOutcome>;

/// Network statistics from the router.
#[async_trait]
pub trait RouterProvider: Send + Sync {
    /// Current statistics, if the router has computed any.
    async fn network_stats(&self) -> Result<Option<NetworkStats>>;

    /// Ask the router to (re)compute statistics. A subsequent
    /// `network_stats` call is expected to return a value, possibly
    /// computed over an empty channel set.
    async fn compute_network_stats(&self) -> Result<()>;
}

/// Balance and chain-tip snapshots from the relayer.
///
/// Balances and block height are fetched together per split cycle so a
/// retry sees a consistent snapshot: freed channels, other in-flight
/// payments, and a fresh expiry base.
#[async_trait]
pub trait RelayerProvider: Send + Sync {
    async fn usable_balances(&self) -> Result<Vec<UsableBalance>>;

    async fn block_height(&self) -> Result<BlockHeight>;
}

/// Spawns one child payment worker per descriptor.
///
/// The worker attempts to send an HTLC along the descriptor's first hop
/// extended by a route suffix to the target, and reports exactly one
/// terminal `ChildOutcome` on `outcomes`. Spawning is a capability
/// parameter of the coordinator so tests can inject doubles.
#[async_trait]
pub trait ChildSpawner: Send + Sync {
    async fn spawn(
        &self,
        child_id: ChildId,
        descriptor: ChildDescriptor,
        outcomes: OutcomeSender,
    ) -> Result<()>;
}

/// Sink for lifecycle observability events.
///
/// Implementations should be fast and non-blocking; the coordinator
/// emits outside its lock.
#[async_trait]
pub trait PaymentEventEmitter: Send + Sync {
    async fn emit(&self, event: LifecycleEvent);

    async fn emit_all(&self, events: Vec<LifecycleEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}

/// Event emitter that discards everything.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventEmitter;

#[async_trait]
impl PaymentEventEmitter for NoOpEventEmitter {
    async fn emit(&self, _event: LifecycleEvent) {
        // Intentionally empty.
    }
}

/// Event emitter that logs every event at debug level.
#[derive(Debug, Clone, Default)]
pub struct LogEventEmitter;

#[async_trait]
impl PaymentEventEmitter for LogEventEmitter {
    async fn emit(&self, event: LifecycleEvent) {
        log::debug!("lifecycle event: {:?}", event);
    }
}
