//! Child supervisor registry.
//!
//! Maps live child-attempt identifiers to the payment they belong to and
//! the descriptor they were spawned with. The registry allocates a fresh
//! universally unique id per spawn and holds no other state; the child
//! worker behind an id is a black box to the coordinator.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::model::{ChildDescriptor, ChildId, PaymentId};

/// One live child entry.
#[derive(Debug, Clone)]
pub struct ChildEntry {
    pub payment_id: PaymentId,
    pub descriptor: ChildDescriptor,
}

/// Live mapping from child id to pending descriptor.
///
/// Wrapped in a `tokio::sync::Mutex` internally; designed to be shared
/// behind an `Arc`. Entries are removed when a child's single terminal
/// outcome arrives, which also makes duplicate outcomes detectable.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    children: Mutex<HashMap<ChildId, ChildEntry>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a descriptor under a fresh child id.
    pub async fn register(&self, payment_id: PaymentId, descriptor: ChildDescriptor) -> ChildId {
        let child_id = ChildId::new();
        let mut children = self.children.lock().await;
        children.insert(
            child_id,
            ChildEntry {
                payment_id,
                descriptor,
            },
        );
        child_id
    }

    /// Resolves and removes a child on outcome arrival. Returns `None`
    /// for unknown ids, including a second outcome for the same child.
    pub async fn take(&self, child_id: ChildId) -> Option<ChildEntry> {
        let mut children = self.children.lock().await;
        children.remove(&child_id)
    }

    /// Looks up a child without removing it.
    pub async fn get(&self, child_id: ChildId) -> Option<ChildEntry> {
        let children = self.children.lock().await;
        children.get(&child_id).cloned()
    }

    /// Number of live children for one payment.
    pub async fn count(&self, payment_id: PaymentId) -> usize {
        let children = self.children.lock().await;
        children
            .values()
            .filter(|e| e.payment_id == payment_id)
            .count()
    }

    /// Number of live children across all payments.
    pub async fn total_count(&self) -> usize {
        let children = self.children.lock().await;
        children.len()
    }

    /// Ids of all live children for one payment.
    pub async fn child_ids(&self, payment_id: PaymentId) -> Vec<ChildId> {
        let children = self.children.lock().await;
        children
            .iter()
            .filter(|(_, e)| e.payment_id == payment_id)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ChannelUpdate, FinalPayload, FirstHop, PaymentHash, PaymentSecret, RouteParams,
    };
    use crate::primitives::{Msat, Ppm, ShortChannelId};

    fn test_descriptor() -> ChildDescriptor {
        ChildDescriptor {
            payment_hash: PaymentHash([0xab; 32]),
            target: "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
                .parse()
                .unwrap(),
            final_payload: FinalPayload {
                amount: Msat(500_000),
                total_amount: Msat(1_000_000),
                expiry: 800_013,
                payment_secret: PaymentSecret([0x11; 32]),
            },
            max_attempts: 3,
            first_hop: FirstHop {
                peer: "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
                    .parse()
                    .unwrap(),
                short_channel_id: ShortChannelId(42),
                channel_update: ChannelUpdate {
                    fee_base: Msat(1000),
                    fee_proportional: Ppm::from_ppm(100),
                    cltv_expiry_delta: 144,
                    htlc_minimum: Msat(1),
                    htlc_maximum: None,
                },
            },
            route_params: RouteParams::default(),
        }
    }

    #[tokio::test]
    async fn test_register_allocates_unique_ids() {
        let registry = ChildRegistry::new();
        let payment = PaymentId::new();

        let a = registry.register(payment, test_descriptor()).await;
        let b = registry.register(payment, test_descriptor()).await;

        assert_ne!(a, b);
        assert_eq!(registry.count(payment).await, 2);
    }

    #[tokio::test]
    async fn test_take_removes_and_dedupes() {
        let registry = ChildRegistry::new();
        let payment = PaymentId::new();
        let child = registry.register(payment, test_descriptor()).await;

        let entry = registry.take(child).await.unwrap();
        assert_eq!(entry.payment_id, payment);
        assert_eq!(entry.descriptor.amount(), Msat(500_000));

        // A second outcome for the same child resolves to nothing.
        assert!(registry.take(child).await.is_none());
        assert_eq!(registry.total_count().await, 0);
    }

    #[tokio::test]
    async fn test_counts_are_per_payment() {
        let registry = ChildRegistry::new();
        let payment_a = PaymentId::new();
        let payment_b = PaymentId::new();

        registry.register(payment_a, test_descriptor()).await;
        registry.register(payment_a, test_descriptor()).await;
        let b_child = registry.register(payment_b, test_descriptor()).await;

        assert_eq!(registry.count(payment_a).await, 2);
        assert_eq!(registry.count(payment_b).await, 1);
        assert_eq!(registry.total_count().await, 3);

        let ids = registry.child_ids(payment_b).await;
        assert_eq!(ids, vec![b_child]);
    }
}
