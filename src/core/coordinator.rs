//! The payment coordinator: async shell around the lifecycle machine.
//!
//! The coordinator owns the live lifecycles and drives each one as a
//! single-threaded cooperative actor: one input is applied to completion
//! (including the feedback inputs produced by executing its outputs)
//! before the next input for that payment is taken. The map lock is held
//! only while applying an input; provider calls run outside it.
//!
//! Child workers report back on an mpsc channel drained by a dispatcher
//! task, so outcomes are processed in arrival order. On the terminal
//! event the lifecycle state is dropped; the outcome goes to the
//! original caller through a oneshot and to every bus subscriber.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::core::lifecycle::{
    ApplyResult, Lifecycle, LifecycleInput, LifecycleOutput, LifecyclePhase,
};
use crate::core::provider::{ChildSpawner, PaymentEventEmitter, RelayerProvider, RouterProvider};
use crate::core::registry::ChildRegistry;
use crate::model::{
    ChildDescriptor, ChildId, ChildOutcome, FailureRecord, LocalFailureReason, PaymentId,
    PaymentOutcome, RequestError, SendRequest,
};

/// Capacity of the terminal-outcome broadcast bus.
const OUTCOME_BUS_CAPACITY: usize = 64;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by coordinator operations.
#[derive(Debug)]
pub enum CoordinatorError {
    /// The request failed validation before a lifecycle was created.
    InvalidRequest(RequestError),
    /// No live lifecycle under this id.
    NotFound(PaymentId),
    /// The dispatcher task is already running.
    AlreadyStarted,
    /// A provider call failed.
    Provider(String),
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(e) => write!(f, "invalid request: {}", e),
            Self::NotFound(id) => write!(f, "payment not found: {}", id),
            Self::AlreadyStarted => write!(f, "dispatcher already started"),
            Self::Provider(e) => write!(f, "provider call failed: {}", e),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<RequestError> for CoordinatorError {
    fn from(e: RequestError) -> Self {
        CoordinatorError::InvalidRequest(e)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Coordinator configuration.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Seed for the per-payment randomness. `None` seeds from OS
    /// entropy; tests pin it for reproducible splits.
    pub rng_seed: Option<u64>,
}

// ============================================================================
// Handle
// ============================================================================

/// Returned from [`PaymentCoordinator::send`]; resolves to the single
/// terminal outcome of the payment.
#[derive(Debug)]
pub struct PaymentHandle {
    pub id: PaymentId,
    pub outcome: oneshot::Receiver<PaymentOutcome>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Coordinates multi-part payment lifecycles.
///
/// Generic over the router, relayer, child spawner and event emitter so
/// tests can substitute deterministic doubles for all of them.
pub struct PaymentCoordinator<R, L, S, E>
where
    R: RouterProvider,
    L: RelayerProvider,
    S: ChildSpawner,
    E: PaymentEventEmitter,
{
    lifecycles: Arc<Mutex<HashMap<PaymentId, Lifecycle>>>,
    /// Oneshot senders back to the original callers.
    waiters: Arc<Mutex<HashMap<PaymentId, oneshot::Sender<PaymentOutcome>>>>,
    registry: Arc<ChildRegistry>,
    router: Arc<R>,
    relayer: Arc<L>,
    spawner: Arc<S>,
    emitter: Arc<E>,
    outcome_bus: broadcast::Sender<PaymentOutcome>,
    outcomes_tx: mpsc::UnboundedSender<ChildOutcome>,
    outcomes_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ChildOutcome>>>>,
    seed_rng: Arc<Mutex<StdRng>>,
}

impl<R, L, S, E> PaymentCoordinator<R, L, S, E>
where
    R: RouterProvider + 'static,
    L: RelayerProvider + 'static,
    S: ChildSpawner + 'static,
    E: PaymentEventEmitter + 'static,
{
    pub fn new(
        router: Arc<R>,
        relayer: Arc<L>,
        spawner: Arc<S>,
        emitter: Arc<E>,
        config: CoordinatorConfig,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (outcome_bus, _) = broadcast::channel(OUTCOME_BUS_CAPACITY);
        let seed_rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            lifecycles: Arc::new(Mutex::new(HashMap::new())),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            registry: Arc::new(ChildRegistry::new()),
            router,
            relayer,
            spawner,
            emitter,
            outcome_bus,
            outcomes_tx,
            outcomes_rx: Arc::new(Mutex::new(Some(outcomes_rx))),
            seed_rng: Arc::new(Mutex::new(seed_rng)),
        }
    }

    /// Starts the dispatcher task draining child outcomes. Must be
    /// called once before payments are submitted.
    pub async fn start(&self) -> Result<JoinHandle<()>, CoordinatorError> {
        let rx = self
            .outcomes_rx
            .lock()
            .await
            .take()
            .ok_or(CoordinatorError::AlreadyStarted)?;
        let this = self.clone();
        Ok(tokio::spawn(async move {
            this.dispatch_loop(rx).await;
        }))
    }

    /// Subscribes to the terminal outcomes of all payments.
    pub fn subscribe(&self) -> broadcast::Receiver<PaymentOutcome> {
        self.outcome_bus.subscribe()
    }

    /// The live child registry, shared with the dispatcher.
    pub fn registry(&self) -> Arc<ChildRegistry> {
        Arc::clone(&self.registry)
    }

    /// Submits a payment. Returns a handle resolving to the single
    /// terminal outcome; the same outcome is published on the bus.
    pub async fn send(&self, request: SendRequest) -> Result<PaymentHandle, CoordinatorError> {
        request.validate()?;
        let id = PaymentId::new();
        let seed = self.seed_rng.lock().await.random::<u64>();
        {
            let mut lifecycles = self.lifecycles.lock().await;
            lifecycles.insert(id, Lifecycle::new(id, seed));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id, tx);

        debug!(
            "submitting {} for {} to {}",
            id, request.amount, request.target
        );
        if let Err(e) = self
            .apply_input(id, LifecycleInput::Submit { request })
            .await
        {
            // A failed submission must not leave a live entry behind.
            self.lifecycles.lock().await.remove(&id);
            self.waiters.lock().await.remove(&id);
            return Err(e);
        }
        Ok(PaymentHandle { id, outcome: rx })
    }

    /// Applies one input to a lifecycle, executing the resulting outputs
    /// and feeding their responses back in until the machine is quiescent.
    pub async fn apply_input(
        &self,
        id: PaymentId,
        input: LifecycleInput,
    ) -> Result<LifecyclePhase, CoordinatorError> {
        let mut queue = VecDeque::from([input]);
        let mut phase = LifecyclePhase::Init;

        while let Some(input) = queue.pop_front() {
            trace!("{} applying {:?}", id, input);
            let (result, complete) = self.apply_locked(id, input, &mut phase).await?;
            self.emitter.emit_all(result.events).await;

            // Provider failures do not escape as errors: they feed back
            // into the machine so the lifecycle still reaches its single
            // terminal event.
            for output in result.outputs {
                match output {
                    LifecycleOutput::SpawnChildren { descriptors } => {
                        let feedback =
                            self.register_and_spawn(id, descriptors, &mut phase).await?;
                        queue.extend(feedback);
                    }
                    other => match self.execute(id, other).await {
                        Ok(Some(feedback)) => queue.push_back(feedback),
                        Ok(None) => {}
                        Err(CoordinatorError::Provider(message)) => {
                            warn!("{} provider call failed: {}", id, message);
                            queue.push_back(LifecycleInput::ProviderFailed { message });
                        }
                        Err(e) => return Err(e),
                    },
                }
            }

            if complete {
                // State lives exactly until the terminal event is out.
                self.lifecycles.lock().await.remove(&id);
                debug!("{} complete", id);
                break;
            }
        }
        Ok(phase)
    }

    /// Current phase of a live lifecycle.
    pub async fn phase(&self, id: PaymentId) -> Option<LifecyclePhase> {
        let lifecycles = self.lifecycles.lock().await;
        lifecycles.get(&id).map(|l| l.phase())
    }

    /// Number of live (non-complete) lifecycles.
    pub async fn active_count(&self) -> usize {
        let lifecycles = self.lifecycles.lock().await;
        lifecycles.len()
    }

    async fn apply_locked(
        &self,
        id: PaymentId,
        input: LifecycleInput,
        phase: &mut LifecyclePhase,
    ) -> Result<(ApplyResult, bool), CoordinatorError> {
        let mut lifecycles = self.lifecycles.lock().await;
        let lifecycle = lifecycles
            .get_mut(&id)
            .ok_or(CoordinatorError::NotFound(id))?;
        let result = lifecycle.apply(input);
        *phase = lifecycle.phase();
        Ok((result, lifecycle.is_complete()))
    }

    /// Registers the new children with the registry and the state
    /// machine before any worker runs, so an immediately-reporting
    /// worker always finds its child pending. Only then are the workers
    /// spawned.
    ///
    /// A spawn failure yields `ChildFailed` feedback inputs for the
    /// children that got no worker, so the machine retries or aborts
    /// them under the normal budget rules instead of hanging on
    /// children that can never report.
    async fn register_and_spawn(
        &self,
        id: PaymentId,
        descriptors: Vec<ChildDescriptor>,
        phase: &mut LifecyclePhase,
    ) -> Result<Vec<LifecycleInput>, CoordinatorError> {
        let mut children: Vec<(ChildId, ChildDescriptor)> =
            Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let child_id = self.registry.register(id, descriptor.clone()).await;
            children.push((child_id, descriptor));
        }

        let (result, _) = self
            .apply_locked(
                id,
                LifecycleInput::ChildrenRegistered {
                    children: children.clone(),
                },
                phase,
            )
            .await?;
        self.emitter.emit_all(result.events).await;

        for (i, (child_id, descriptor)) in children.iter().enumerate() {
            if let Err(e) = self
                .spawner
                .spawn(*child_id, descriptor.clone(), self.outcomes_tx.clone())
                .await
            {
                warn!("{} failed to spawn {}: {}", id, child_id, e);
                let mut feedback = Vec::with_capacity(children.len() - i);
                for (unspawned, _) in &children[i..] {
                    self.registry.take(*unspawned).await;
                    feedback.push(LifecycleInput::ChildFailed {
                        child_id: *unspawned,
                        failures: vec![FailureRecord::local(LocalFailureReason::Other(
                            format!("failed to spawn child worker: {}", e),
                        ))],
                    });
                }
                return Ok(feedback);
            }
        }
        debug!("{} dispatched children", id);
        Ok(Vec::new())
    }

    async fn dispatch_loop(self, mut rx: mpsc::UnboundedReceiver<ChildOutcome>) {
        debug!("child outcome dispatcher started");
        while let Some(outcome) = rx.recv().await {
            if let Err(e) = self.handle_child_outcome(outcome).await {
                warn!("failed to process child outcome: {}", e);
            }
        }
        debug!("child outcome channel closed, dispatcher exiting");
    }

    async fn handle_child_outcome(&self, outcome: ChildOutcome) -> Result<(), CoordinatorError> {
        let child_id = outcome.child_id();
        // Resolving removes the entry, so a duplicate outcome for the
        // same child never reaches the state machine.
        let Some(entry) = self.registry.take(child_id).await else {
            warn!("outcome for unknown {}", child_id);
            return Ok(());
        };
        let input = match outcome {
            ChildOutcome::Sent {
                preimage, parts, ..
            } => LifecycleInput::ChildSucceeded {
                child_id,
                preimage,
                parts,
            },
            ChildOutcome::Failed { failures, .. } => LifecycleInput::ChildFailed {
                child_id,
                failures,
            },
        };
        self.apply_input(entry.payment_id, input).await.map(|_| ())
    }

    async fn execute(
        &self,
        id: PaymentId,
        output: LifecycleOutput,
    ) -> Result<Option<LifecycleInput>, CoordinatorError> {
        match output {
            LifecycleOutput::FetchNetworkStats => {
                let stats = self
                    .router
                    .network_stats()
                    .await
                    .map_err(|e| CoordinatorError::Provider(e.to_string()))?;
                Ok(Some(LifecycleInput::NetworkStatsReady { stats }))
            }

            LifecycleOutput::TriggerStatsComputation => {
                self.router
                    .compute_network_stats()
                    .await
                    .map_err(|e| CoordinatorError::Provider(e.to_string()))?;
                Ok(None)
            }

            LifecycleOutput::FetchBalances { to_send } => {
                let balances = self
                    .relayer
                    .usable_balances()
                    .await
                    .map_err(|e| CoordinatorError::Provider(e.to_string()))?;
                let block_height = self
                    .relayer
                    .block_height()
                    .await
                    .map_err(|e| CoordinatorError::Provider(e.to_string()))?;
                Ok(Some(LifecycleInput::BalancesReady {
                    to_send,
                    balances,
                    block_height,
                }))
            }

            // Handled inline by apply_input so registration precedes
            // worker spawn.
            LifecycleOutput::SpawnChildren { .. } => Ok(None),

            LifecycleOutput::EmitOutcome { outcome } => {
                if let Some(tx) = self.waiters.lock().await.remove(&id) {
                    // The caller may have dropped the handle.
                    let _ = tx.send(outcome.clone());
                }
                // No subscribers on the bus is fine.
                let _ = self.outcome_bus.send(outcome);
                Ok(None)
            }
        }
    }
}

// Cloning shares the same lifecycle map, registry and channels.
impl<R, L, S, E> Clone for PaymentCoordinator<R, L, S, E>
where
    R: RouterProvider,
    L: RelayerProvider,
    S: ChildSpawner,
    E: PaymentEventEmitter,
{
    fn clone(&self) -> Self {
        Self {
            lifecycles: Arc::clone(&self.lifecycles),
            waiters: Arc::clone(&self.waiters),
            registry: Arc::clone(&self.registry),
            router: Arc::clone(&self.router),
            relayer: Arc::clone(&self.relayer),
            spawner: Arc::clone(&self.spawner),
            emitter: Arc::clone(&self.emitter),
            outcome_bus: self.outcome_bus.clone(),
            outcomes_tx: self.outcomes_tx.clone(),
            outcomes_rx: Arc::clone(&self.outcomes_rx),
            seed_rng: Arc::clone(&self.seed_rng),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
