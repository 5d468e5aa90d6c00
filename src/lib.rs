//! Multi-part payment lifecycle coordinator for a Lightning Network node.
//!
//! Given a request to pay a total amount to a recipient, the coordinator
//! splits the amount across concurrent HTLCs over different local
//! channels, supervises each child attempt, retries failures within a
//! bounded global attempt budget, and aggregates the per-part outcomes
//! into a single terminal success or failure event.
//!
//! The crate is built around a pure state machine
//! ([`core::lifecycle::Lifecycle`]) wrapped by an async actor shell
//! ([`core::coordinator::PaymentCoordinator`]). Route finding, channel
//! bookkeeping and the actual HTLC sending live outside the crate,
//! behind the provider traits in [`core::provider`].

pub mod core;
pub mod model;
pub mod primitives;

pub use crate::core::coordinator::{
    CoordinatorConfig, CoordinatorError, PaymentCoordinator, PaymentHandle,
};
pub use crate::core::lifecycle::{Lifecycle, LifecycleEvent, LifecycleInput, LifecyclePhase};
pub use crate::core::provider::{
    ChildSpawner, OutcomeSender, PaymentEventEmitter, RelayerProvider, RouterProvider,
};
pub use crate::core::splitter::{split, SplitResult};
pub use crate::model::{
    ChildDescriptor, ChildId, ChildOutcome, FailureRecord, PaymentId, PaymentOutcome, SendRequest,
};
