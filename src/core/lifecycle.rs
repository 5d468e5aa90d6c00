//! The supervising state machine of one multi-part payment.
//!
//! The machine is pure: it performs no I/O and consults no clock. Every
//! interaction with the outside world is expressed as an input applied
//! to the machine or an output it asks the surrounding shell to execute.
//! This keeps the whole lifecycle testable in isolation and makes the
//! shell a thin translation layer.
//!
//! One lifecycle moves through:
//!
//! ```text
//! Init -> FetchingNetworkStats -> FetchingBalances -> InProgress
//!                                       |                 |
//!                                       v                 v
//!                                   (failure)    Succeeded / Aborted -> Complete
//! ```
//!
//! `Succeeded` and `Aborted` hold the terminal decision but keep waiting
//! for outstanding children; the single terminal event is emitted when
//! the last child reports, which is also when the machine enters
//! `Complete` and starts ignoring all further input.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::failure::{batch_is_fatal, FailureAggregator};
use crate::core::splitter::split;
use crate::model::{
    ChildDescriptor, ChildId, FailureRecord, LocalFailureReason, NetworkStats, PartialPayment,
    PaymentFailed, PaymentHash, PaymentId, PaymentOutcome, PaymentPreimage, PaymentSent,
    SendRequest, UsableBalance,
};
use crate::primitives::{BlockHeight, Msat};

// ============================================================================
// State
// ============================================================================

/// Which phase the lifecycle is in (for logging/events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Init,
    FetchingNetworkStats,
    FetchingBalances,
    InProgress,
    Succeeded,
    Aborted,
    Complete,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Init => write!(f, "init"),
            LifecyclePhase::FetchingNetworkStats => write!(f, "fetching_network_stats"),
            LifecyclePhase::FetchingBalances => write!(f, "fetching_balances"),
            LifecyclePhase::InProgress => write!(f, "in_progress"),
            LifecyclePhase::Succeeded => write!(f, "succeeded"),
            LifecyclePhase::Aborted => write!(f, "aborted"),
            LifecyclePhase::Complete => write!(f, "complete"),
        }
    }
}

/// Working set while children are in flight and retries are possible.
#[derive(Debug, Clone)]
pub struct PaymentProgress {
    pub request: SendRequest,
    pub network_stats: NetworkStats,
    /// Children in flight, by id. The machine exclusively owns this map;
    /// child workers communicate only by messages.
    pub pending: HashMap<ChildId, ChildDescriptor>,
    /// Ordered failure records plus the shared retry budget.
    pub failures: FailureAggregator,
    pub partial_successes: Vec<PartialPayment>,
}

/// Terminal decision = failure; waits for outstanding children so their
/// late outcomes are absorbed (a late success still wins).
#[derive(Debug, Clone)]
pub struct PaymentAborted {
    pub request: SendRequest,
    pub failures: Vec<FailureRecord>,
    pub pending: HashSet<ChildId>,
}

/// Terminal decision = success; waits for outstanding children so the
/// fee accounting in the terminal event is complete.
#[derive(Debug, Clone)]
pub struct PaymentSucceeded {
    pub request: SendRequest,
    pub preimage: PaymentPreimage,
    pub parts: Vec<PartialPayment>,
    pub pending: HashSet<ChildId>,
}

/// The state of one payment lifecycle.
#[derive(Debug, Clone)]
pub enum LifecycleState {
    /// Waiting for a send request.
    Init,
    /// Waiting for network statistics from the router.
    FetchingNetworkStats { request: SendRequest },
    /// Waiting for usable balances from the relayer.
    FetchingBalances {
        request: SendRequest,
        network_stats: NetworkStats,
    },
    /// Children in flight, no terminal decision made.
    InProgress(PaymentProgress),
    Succeeded(PaymentSucceeded),
    Aborted(PaymentAborted),
    /// Terminal event emitted; all further input is ignored.
    Complete,
}

impl LifecycleState {
    pub fn phase(&self) -> LifecyclePhase {
        match self {
            LifecycleState::Init => LifecyclePhase::Init,
            LifecycleState::FetchingNetworkStats { .. } => LifecyclePhase::FetchingNetworkStats,
            LifecycleState::FetchingBalances { .. } => LifecyclePhase::FetchingBalances,
            LifecycleState::InProgress(_) => LifecyclePhase::InProgress,
            LifecycleState::Succeeded(_) => LifecyclePhase::Succeeded,
            LifecycleState::Aborted(_) => LifecyclePhase::Aborted,
            LifecycleState::Complete => LifecyclePhase::Complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, LifecycleState::Complete)
    }
}

// ============================================================================
// Input / Output
// ============================================================================

/// All inputs that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum LifecycleInput {
    /// The caller submits a payment request.
    Submit { request: SendRequest },
    /// The router answered a network statistics query.
    NetworkStatsReady { stats: Option<NetworkStats> },
    /// The relayer answered a balance query. `to_send` echoes the amount
    /// from the `FetchBalances` output so concurrent retry re-splits
    /// route their own amounts.
    BalancesReady {
        to_send: Msat,
        balances: Vec<UsableBalance>,
        block_height: BlockHeight,
    },
    /// The shell registered and spawned the requested children.
    ChildrenRegistered {
        children: Vec<(ChildId, ChildDescriptor)>,
    },
    /// A child worker obtained the preimage.
    ChildSucceeded {
        child_id: ChildId,
        preimage: PaymentPreimage,
        parts: Vec<PartialPayment>,
    },
    /// A child worker gave up, with its collected failure records.
    ChildFailed {
        child_id: ChildId,
        failures: Vec<FailureRecord>,
    },
    /// A shell-side provider call failed; the lifecycle cannot make
    /// further progress on its own and must still reach a terminal
    /// event.
    ProviderFailed { message: String },
}

/// Commands for the surrounding shell.
#[derive(Debug, Clone)]
pub enum LifecycleOutput {
    /// Query the router for network statistics.
    FetchNetworkStats,
    /// Ask the router to (re)compute statistics before the next query.
    TriggerStatsComputation,
    /// Query the relayer for fresh balances to split `to_send` over.
    FetchBalances { to_send: Msat },
    /// Register and spawn one child worker per descriptor.
    SpawnChildren { descriptors: Vec<ChildDescriptor> },
    /// Deliver the single terminal event to the caller and the bus.
    EmitOutcome { outcome: PaymentOutcome },
}

/// Observability events emitted by the machine.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    PaymentSubmitted {
        id: PaymentId,
        payment_hash: PaymentHash,
        amount: Msat,
        max_attempts: u32,
    },
    SplitComputed {
        id: PaymentId,
        parts: usize,
        allocated: Msat,
    },
    ChildrenDispatched {
        id: PaymentId,
        count: usize,
        pending: usize,
    },
    ChildSucceeded {
        id: PaymentId,
        child_id: ChildId,
        amount: Msat,
    },
    ChildFailed {
        id: PaymentId,
        child_id: ChildId,
        failure_count: usize,
    },
    RetryScheduled {
        id: PaymentId,
        missing: Msat,
        remaining_attempts: u32,
    },
    PaymentSucceeded {
        id: PaymentId,
        payment_hash: PaymentHash,
        amount: Msat,
        fees: Msat,
        parts: usize,
    },
    PaymentFailed {
        id: PaymentId,
        payment_hash: PaymentHash,
        failure_count: usize,
    },
}

/// Result of applying one input.
#[derive(Debug, Clone, Default)]
pub struct ApplyResult {
    pub events: Vec<LifecycleEvent>,
    pub outputs: Vec<LifecycleOutput>,
}

// ============================================================================
// Lifecycle
// ============================================================================

/// One payment lifecycle: identifier, state, and the seeded generator
/// feeding the splitter's randomization.
#[derive(Debug)]
pub struct Lifecycle {
    id: PaymentId,
    state: LifecycleState,
    rng: StdRng,
}

impl Lifecycle {
    pub fn new(id: PaymentId, seed: u64) -> Self {
        Self {
            id,
            state: LifecycleState::Init,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.phase()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Applies one input, advancing the state machine. Unmatched
    /// (state, input) pairs are ignored so the machine tolerates any
    /// interleaving of child outcomes and fetch responses.
    pub fn apply(&mut self, input: LifecycleInput) -> ApplyResult {
        let state = std::mem::replace(&mut self.state, LifecycleState::Init);
        let mut result = ApplyResult::default();
        self.state = self.transition(state, input, &mut result);
        result
    }

    fn transition(
        &mut self,
        state: LifecycleState,
        input: LifecycleInput,
        result: &mut ApplyResult,
    ) -> LifecycleState {
        match (state, input) {
            // ---- Submission --------------------------------------------------
            (LifecycleState::Init, LifecycleInput::Submit { request }) => {
                result.events.push(LifecycleEvent::PaymentSubmitted {
                    id: self.id,
                    payment_hash: request.payment_hash,
                    amount: request.amount,
                    max_attempts: request.max_attempts,
                });
                if request.invoice.is_none() {
                    // No invoice means no payment secret; nothing can be
                    // dispatched.
                    return self.fail_terminal(
                        request,
                        vec![FailureRecord::local(LocalFailureReason::MissingPaymentSecret)],
                        HashSet::new(),
                        result,
                    );
                }
                result.outputs.push(LifecycleOutput::FetchNetworkStats);
                LifecycleState::FetchingNetworkStats { request }
            }

            // ---- Network statistics -----------------------------------------
            (
                LifecycleState::FetchingNetworkStats { request },
                LifecycleInput::NetworkStatsReady { stats: None },
            ) => {
                // Stats are not there yet: poke the router and poll again.
                result.outputs.push(LifecycleOutput::TriggerStatsComputation);
                result.outputs.push(LifecycleOutput::FetchNetworkStats);
                LifecycleState::FetchingNetworkStats { request }
            }
            (
                LifecycleState::FetchingNetworkStats { request },
                LifecycleInput::NetworkStatsReady {
                    stats: Some(network_stats),
                },
            ) => {
                result.outputs.push(LifecycleOutput::FetchBalances {
                    to_send: request.amount,
                });
                LifecycleState::FetchingBalances {
                    request,
                    network_stats,
                }
            }

            // ---- Initial split ----------------------------------------------
            (
                LifecycleState::FetchingBalances {
                    request,
                    network_stats,
                },
                LifecycleInput::BalancesReady {
                    to_send,
                    balances,
                    block_height,
                },
            ) => {
                let split_result = split(
                    to_send,
                    &balances,
                    Some(&network_stats),
                    &request,
                    block_height,
                    &mut self.rng,
                );
                if !split_result.is_complete() {
                    // Never enter InProgress with an underfunded plan.
                    return self.fail_terminal(
                        request,
                        vec![FailureRecord::local(LocalFailureReason::BalanceTooLow)],
                        HashSet::new(),
                        result,
                    );
                }
                result.events.push(LifecycleEvent::SplitComputed {
                    id: self.id,
                    parts: split_result.descriptors.len(),
                    allocated: to_send,
                });
                // The initial dispatch consumes one unit of the global
                // attempt budget.
                let remaining_attempts = request.max_attempts.saturating_sub(1);
                result.outputs.push(LifecycleOutput::SpawnChildren {
                    descriptors: split_result.descriptors,
                });
                LifecycleState::InProgress(PaymentProgress {
                    request,
                    network_stats,
                    pending: HashMap::new(),
                    failures: FailureAggregator::new(remaining_attempts),
                    partial_successes: Vec::new(),
                })
            }

            // ---- Children registered ----------------------------------------
            (
                LifecycleState::InProgress(mut progress),
                LifecycleInput::ChildrenRegistered { children },
            ) => {
                let count = children.len();
                progress.pending.extend(children);
                result.events.push(LifecycleEvent::ChildrenDispatched {
                    id: self.id,
                    count,
                    pending: progress.pending.len(),
                });
                LifecycleState::InProgress(progress)
            }
            (
                LifecycleState::Succeeded(mut succeeded),
                LifecycleInput::ChildrenRegistered { children },
            ) => {
                succeeded.pending.extend(children.into_iter().map(|(id, _)| id));
                LifecycleState::Succeeded(succeeded)
            }
            (
                LifecycleState::Aborted(mut aborted),
                LifecycleInput::ChildrenRegistered { children },
            ) => {
                aborted.pending.extend(children.into_iter().map(|(id, _)| id));
                LifecycleState::Aborted(aborted)
            }

            // ---- Child success ----------------------------------------------
            (
                LifecycleState::InProgress(mut progress),
                LifecycleInput::ChildSucceeded {
                    child_id,
                    preimage,
                    parts,
                },
            ) => {
                progress.pending.remove(&child_id);
                result.events.push(LifecycleEvent::ChildSucceeded {
                    id: self.id,
                    child_id,
                    amount: parts.iter().map(|p| p.amount).sum(),
                });
                let mut all_parts = progress.partial_successes;
                all_parts.extend(parts);
                let pending: HashSet<ChildId> = progress.pending.keys().copied().collect();
                // The preimage wins; remaining children are not cancelled,
                // their outcomes are absorbed before the terminal event.
                self.succeed_or_complete(progress.request, preimage, all_parts, pending, result)
            }
            (
                LifecycleState::Succeeded(mut succeeded),
                LifecycleInput::ChildSucceeded {
                    child_id, parts, ..
                },
            ) => {
                succeeded.pending.remove(&child_id);
                result.events.push(LifecycleEvent::ChildSucceeded {
                    id: self.id,
                    child_id,
                    amount: parts.iter().map(|p| p.amount).sum(),
                });
                succeeded.parts.extend(parts);
                self.succeed_or_complete(
                    succeeded.request,
                    succeeded.preimage,
                    succeeded.parts,
                    succeeded.pending,
                    result,
                )
            }
            (
                LifecycleState::Aborted(mut aborted),
                LifecycleInput::ChildSucceeded {
                    child_id,
                    preimage,
                    parts,
                },
            ) => {
                // A late preimage is proof of payment; the lifecycle is
                // promoted to success, cheaper than planned. Only the
                // successful children's parts are reported.
                aborted.pending.remove(&child_id);
                result.events.push(LifecycleEvent::ChildSucceeded {
                    id: self.id,
                    child_id,
                    amount: parts.iter().map(|p| p.amount).sum(),
                });
                self.succeed_or_complete(aborted.request, preimage, parts, aborted.pending, result)
            }

            // ---- Child failure ----------------------------------------------
            (
                LifecycleState::InProgress(mut progress),
                LifecycleInput::ChildFailed { child_id, failures },
            ) => {
                let descriptor = progress.pending.remove(&child_id);
                result.events.push(LifecycleEvent::ChildFailed {
                    id: self.id,
                    child_id,
                    failure_count: failures.len(),
                });
                let fatal = batch_is_fatal(&failures);
                progress.failures.extend(failures);

                if fatal {
                    // The recipient gave up on the MPP set; no retry can
                    // help and no further children are spawned.
                    let pending: HashSet<ChildId> = progress.pending.keys().copied().collect();
                    return self.fail_terminal(
                        progress.request,
                        progress.failures.into_records(),
                        pending,
                        result,
                    );
                }

                let Some(descriptor) = descriptor else {
                    // Unknown child: record the failures but do not retry
                    // an amount we cannot attribute.
                    return LifecycleState::InProgress(progress);
                };

                if !progress.failures.try_consume_attempt() {
                    progress
                        .failures
                        .push(FailureRecord::local(LocalFailureReason::RetriesExhausted));
                    let pending: HashSet<ChildId> = progress.pending.keys().copied().collect();
                    return self.fail_terminal(
                        progress.request,
                        progress.failures.into_records(),
                        pending,
                        result,
                    );
                }

                let missing = descriptor.amount();
                result.events.push(LifecycleEvent::RetryScheduled {
                    id: self.id,
                    missing,
                    remaining_attempts: progress.failures.remaining_attempts(),
                });
                // Balances are re-fetched so the re-split sees the freed
                // channel and other payments currently in flight.
                result
                    .outputs
                    .push(LifecycleOutput::FetchBalances { to_send: missing });
                LifecycleState::InProgress(progress)
            }
            (
                LifecycleState::Succeeded(mut succeeded),
                LifecycleInput::ChildFailed { child_id, failures },
            ) => {
                // Once one HTLC of the set was fulfilled the recipient
                // is supposed to fulfill them all. We stick with success
                // and drop the records.
                let _ = failures;
                succeeded.pending.remove(&child_id);
                result.events.push(LifecycleEvent::ChildFailed {
                    id: self.id,
                    child_id,
                    failure_count: 0,
                });
                self.succeed_or_complete(
                    succeeded.request,
                    succeeded.preimage,
                    succeeded.parts,
                    succeeded.pending,
                    result,
                )
            }
            (
                LifecycleState::Aborted(mut aborted),
                LifecycleInput::ChildFailed { child_id, failures },
            ) => {
                aborted.pending.remove(&child_id);
                result.events.push(LifecycleEvent::ChildFailed {
                    id: self.id,
                    child_id,
                    failure_count: failures.len(),
                });
                aborted.failures.extend(failures);
                self.fail_terminal(aborted.request, aborted.failures, aborted.pending, result)
            }

            // ---- Retry re-split ---------------------------------------------
            (
                LifecycleState::InProgress(mut progress),
                LifecycleInput::BalancesReady {
                    to_send,
                    balances,
                    block_height,
                },
            ) => {
                let split_result = split(
                    to_send,
                    &balances,
                    Some(&progress.network_stats),
                    &progress.request,
                    block_height,
                    &mut self.rng,
                );
                if !split_result.is_complete() {
                    // The freed balances cannot cover the gap anymore.
                    progress
                        .failures
                        .push(FailureRecord::local(LocalFailureReason::BalanceTooLow));
                    let pending: HashSet<ChildId> = progress.pending.keys().copied().collect();
                    return self.fail_terminal(
                        progress.request,
                        progress.failures.into_records(),
                        pending,
                        result,
                    );
                }
                result.events.push(LifecycleEvent::SplitComputed {
                    id: self.id,
                    parts: split_result.descriptors.len(),
                    allocated: to_send,
                });
                result.outputs.push(LifecycleOutput::SpawnChildren {
                    descriptors: split_result.descriptors,
                });
                LifecycleState::InProgress(progress)
            }

            // A balance response that arrives after the terminal decision
            // must not spawn anything.
            (state @ LifecycleState::Succeeded(_), LifecycleInput::BalancesReady { .. })
            | (state @ LifecycleState::Aborted(_), LifecycleInput::BalancesReady { .. }) => state,

            // ---- Provider failures ------------------------------------------
            (
                LifecycleState::FetchingNetworkStats { request },
                LifecycleInput::ProviderFailed { message },
            )
            | (
                LifecycleState::FetchingBalances { request, .. },
                LifecycleInput::ProviderFailed { message },
            ) => self.fail_terminal(
                request,
                vec![FailureRecord::local(LocalFailureReason::Other(message))],
                HashSet::new(),
                result,
            ),
            (
                LifecycleState::InProgress(mut progress),
                LifecycleInput::ProviderFailed { message },
            ) => {
                progress
                    .failures
                    .push(FailureRecord::local(LocalFailureReason::Other(message)));
                let pending: HashSet<ChildId> = progress.pending.keys().copied().collect();
                self.fail_terminal(
                    progress.request,
                    progress.failures.into_records(),
                    pending,
                    result,
                )
            }

            // ---- Complete absorbs everything --------------------------------
            (state @ LifecycleState::Complete, _) => state,

            // Anything else is out of protocol; keep the state unchanged.
            (state, _) => state,
        }
    }

    /// Moves to `Succeeded`, or straight to `Complete` with the terminal
    /// event when no children are outstanding.
    fn succeed_or_complete(
        &self,
        request: SendRequest,
        preimage: PaymentPreimage,
        parts: Vec<PartialPayment>,
        pending: HashSet<ChildId>,
        result: &mut ApplyResult,
    ) -> LifecycleState {
        if !pending.is_empty() {
            return LifecycleState::Succeeded(PaymentSucceeded {
                request,
                preimage,
                parts,
                pending,
            });
        }
        let sent = PaymentSent {
            id: self.id,
            payment_hash: request.payment_hash,
            preimage,
            parts,
        };
        result.events.push(LifecycleEvent::PaymentSucceeded {
            id: self.id,
            payment_hash: sent.payment_hash,
            amount: sent.amount(),
            fees: sent.fees(),
            parts: sent.parts.len(),
        });
        result.outputs.push(LifecycleOutput::EmitOutcome {
            outcome: PaymentOutcome::Sent(sent),
        });
        LifecycleState::Complete
    }

    /// Moves to `Aborted`, or straight to `Complete` with the terminal
    /// event when no children are outstanding.
    fn fail_terminal(
        &self,
        request: SendRequest,
        failures: Vec<FailureRecord>,
        pending: HashSet<ChildId>,
        result: &mut ApplyResult,
    ) -> LifecycleState {
        if !pending.is_empty() {
            return LifecycleState::Aborted(PaymentAborted {
                request,
                failures,
                pending,
            });
        }
        result.events.push(LifecycleEvent::PaymentFailed {
            id: self.id,
            payment_hash: request.payment_hash,
            failure_count: failures.len(),
        });
        result.outputs.push(LifecycleOutput::EmitOutcome {
            outcome: PaymentOutcome::Failed(PaymentFailed {
                id: self.id,
                payment_hash: request.payment_hash,
                failures,
            }),
        });
        LifecycleState::Complete
    }
}

// ============================================================================
// Tests
// ============================================================================
