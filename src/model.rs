//! Data model for the multi-part payment coordinator.
//!
//! Everything here is plain data: requests, balance snapshots, child
//! payment descriptors, failure records and terminal outcomes. The types
//! are shared between the pure state machine and the async shell around
//! it and carry no behavior beyond small derived accessors.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::primitives::{BlockHeight, Msat, Ppm, Sat, ShortChannelId};

/// Minimum final CLTV expiry delta assumed when the invoice does not
/// specify one (BOLT 11 default).
pub const DEFAULT_MIN_FINAL_CLTV_DELTA: u16 = 9;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of one payment lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn new() -> Self {
        PaymentId(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "payment:{}", self.0)
    }
}

/// Identifier of one child HTLC attempt within a payment lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChildId(pub Uuid);

impl ChildId {
    pub fn new() -> Self {
        ChildId(Uuid::new_v4())
    }
}

impl Default for ChildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "child:{}", self.0)
    }
}

// ============================================================================
// Hashes and secrets
// ============================================================================

/// 32-byte payment hash shared by every HTLC of one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentHash(#[serde(with = "serde_hex32")] pub [u8; 32]);

impl std::fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 32-byte preimage whose SHA-256 equals the payment hash; proof of payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPreimage(#[serde(with = "serde_hex32")] pub [u8; 32]);

impl PaymentPreimage {
    /// The payment hash this preimage resolves.
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(sha256::Hash::hash(&self.0).to_byte_array())
    }
}

impl std::fmt::Display for PaymentPreimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Per-invoice nonce carried in the final onion payload; the recipient
/// uses it to associate arriving HTLCs into one MPP set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSecret(#[serde(with = "serde_hex32")] pub [u8; 32]);

// ============================================================================
// Request
// ============================================================================

/// Invoice data relevant to the coordinator. Parsing and authentication
/// happen upstream; callers hand us the already-validated fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_secret: PaymentSecret,
    /// Minimum final CLTV expiry delta requested by the recipient, if any.
    pub min_final_cltv_delta: Option<u16>,
    /// Whether the recipient advertised basic multi-part payment support.
    pub basic_mpp: bool,
}

/// One hop of an assisted route from the invoice routing hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraHop {
    pub node_id: PublicKey,
    pub short_channel_id: ShortChannelId,
    pub fee_base: Msat,
    pub fee_proportional: Ppm,
    pub cltv_expiry_delta: u16,
}

/// Constraints on route computation, forwarded to child workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteParams {
    /// Shuffle eligible channels instead of filling largest-first.
    pub randomize: bool,
    /// Flat fee budget per child payment.
    pub max_fee_base: Msat,
    /// Proportional fee budget per child payment.
    pub max_fee_pct: Ppm,
    pub max_route_length: u8,
    pub max_cltv_delta: u16,
    /// Routing hints from the invoice, one assisted route per entry.
    pub assisted_routes: Vec<Vec<ExtraHop>>,
}

impl Default for RouteParams {
    fn default() -> Self {
        Self {
            randomize: false,
            max_fee_base: Msat::from_msat(21_000),
            // 3%
            max_fee_pct: Ppm::from_ppm(30_000),
            max_route_length: 6,
            max_cltv_delta: 1008,
            assisted_routes: Vec::new(),
        }
    }
}

/// Errors rejecting a malformed [`SendRequest`] before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("payment amount must be positive")]
    ZeroAmount,
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
}

/// A caller-supplied request to pay `amount` to `target`. Immutable for
/// the life of the payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub amount: Msat,
    pub payment_hash: PaymentHash,
    pub target: PublicKey,
    /// Global attempt budget across all children of this payment.
    pub max_attempts: u32,
    pub min_final_cltv_delta: u16,
    pub invoice: Option<Invoice>,
    pub route_params: Option<RouteParams>,
}

impl SendRequest {
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.amount.is_zero() {
            return Err(RequestError::ZeroAmount);
        }
        if self.max_attempts == 0 {
            return Err(RequestError::ZeroAttempts);
        }
        Ok(())
    }

    /// Route parameters with defaults filled in when the caller gave none.
    pub fn route_params(&self) -> RouteParams {
        self.route_params.clone().unwrap_or_default()
    }

    /// Absolute expiry of the final payload for children dispatched at
    /// `block_height`: one block of slack plus the larger of the caller's
    /// delta and the invoice's (defaulting to 9).
    pub fn final_expiry(&self, block_height: BlockHeight) -> BlockHeight {
        let invoice_delta = self
            .invoice
            .as_ref()
            .and_then(|i| i.min_final_cltv_delta)
            .unwrap_or(DEFAULT_MIN_FINAL_CLTV_DELTA);
        block_height + 1 + self.min_final_cltv_delta.max(invoice_delta) as u32
    }
}

// ============================================================================
// Balances and network statistics
// ============================================================================

/// A peer's advertised forwarding policy for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub fee_base: Msat,
    pub fee_proportional: Ppm,
    pub cltv_expiry_delta: u16,
    pub htlc_minimum: Msat,
    pub htlc_maximum: Option<Msat>,
}

impl ChannelUpdate {
    /// The fee the peer charges for forwarding `amount` over this channel.
    pub fn fee_for(&self, amount: Msat) -> Msat {
        self.fee_base + self.fee_proportional.apply_to(amount)
    }
}

/// Per-channel snapshot of what we can currently send, as reported by
/// the relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsableBalance {
    pub peer: PublicKey,
    pub short_channel_id: ShortChannelId,
    pub can_send: Msat,
    pub in_flight: Msat,
    pub is_public: bool,
    pub channel_update: ChannelUpdate,
}

/// Distributional summary of remote channel capacities, used by the
/// splitter as a fragment-sizing hint for remote recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub capacity: CapacityStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityStats {
    pub median: Sat,
    pub percentile75: Sat,
    pub percentile90: Sat,
    pub percentile99: Sat,
}

// ============================================================================
// Child descriptors
// ============================================================================

/// The final onion payload of one child HTLC. `total_amount` carries the
/// full payment amount on every child so the recipient can assemble the
/// MPP set; `payment_secret` is identical across children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalPayload {
    pub amount: Msat,
    pub total_amount: Msat,
    pub expiry: BlockHeight,
    pub payment_secret: PaymentSecret,
}

/// The sender-dictated first hop of a child payment: our own node to a
/// specific peer over a specific channel. The route suffix from that
/// peer to the target is completed by the child's route computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstHop {
    pub peer: PublicKey,
    pub short_channel_id: ShortChannelId,
    pub channel_update: ChannelUpdate,
}

/// One intended HTLC attempt produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildDescriptor {
    pub payment_hash: PaymentHash,
    pub target: PublicKey,
    pub final_payload: FinalPayload,
    pub max_attempts: u32,
    pub first_hop: FirstHop,
    pub route_params: RouteParams,
}

impl ChildDescriptor {
    /// Amount delivered to the recipient by this child.
    pub fn amount(&self) -> Msat {
        self.final_payload.amount
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// One hop of a route as reported in a remote failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub node_id: PublicKey,
    pub next_node_id: PublicKey,
    pub short_channel_id: ShortChannelId,
}

/// A child HTLC attempt that resolved successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPayment {
    pub child_id: ChildId,
    pub amount: Msat,
    pub fees: Msat,
    pub first_hop_channel_id: ShortChannelId,
    pub route: Option<Vec<Hop>>,
}

/// Failure messages decrypted from a peer's onion error.
///
/// Only the variants the coordinator reacts to are distinguished;
/// everything else the child workers report is transient from our point
/// of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnionFailure {
    /// The recipient gave up waiting for the complete MPP set. Fatal:
    /// no retry can help once the recipient has abandoned the payment.
    PaymentTimeout,
    TemporaryNodeFailure,
    TemporaryChannelFailure,
    UnknownNextPeer,
    FeeInsufficient,
    ExpiryTooSoon,
    IncorrectOrUnknownPaymentDetails,
}

impl std::fmt::Display for OnionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OnionFailure::PaymentTimeout => "payment_timeout",
            OnionFailure::TemporaryNodeFailure => "temporary_node_failure",
            OnionFailure::TemporaryChannelFailure => "temporary_channel_failure",
            OnionFailure::UnknownNextPeer => "unknown_next_peer",
            OnionFailure::FeeInsufficient => "fee_insufficient",
            OnionFailure::ExpiryTooSoon => "expiry_too_soon",
            OnionFailure::IncorrectOrUnknownPaymentDetails => {
                "incorrect_or_unknown_payment_details"
            }
        };
        write!(f, "{}", s)
    }
}

/// Reason for a failure that originated on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalFailureReason {
    /// Aggregate usable balance cannot cover the requested amount.
    BalanceTooLow,
    /// The global attempt budget ran out without obtaining a preimage.
    RetriesExhausted,
    /// The request carried no invoice, so no payment secret is available.
    MissingPaymentSecret,
    /// Free-form reason reported by a child worker.
    Other(String),
}

impl std::fmt::Display for LocalFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalFailureReason::BalanceTooLow => write!(f, "balance is too low"),
            LocalFailureReason::RetriesExhausted => {
                write!(f, "payment attempts exhausted without success")
            }
            LocalFailureReason::MissingPaymentSecret => {
                write!(f, "payment secret is missing")
            }
            LocalFailureReason::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// One recorded failure of a child attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureRecord {
    /// Self-originated failure.
    Local { reason: LocalFailureReason },
    /// A peer-decrypted onion failure along the given route.
    Remote {
        route: Vec<Hop>,
        failure: OnionFailure,
    },
    /// An onion failure we could not decrypt.
    UnreadableRemote { route: Vec<Hop> },
}

impl FailureRecord {
    pub fn local(reason: LocalFailureReason) -> Self {
        FailureRecord::Local { reason }
    }
}

/// Terminal success event for a payment lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSent {
    pub id: PaymentId,
    pub payment_hash: PaymentHash,
    pub preimage: PaymentPreimage,
    /// Successful parts in reporting order.
    pub parts: Vec<PartialPayment>,
}

impl PaymentSent {
    /// Aggregate amount delivered to the recipient.
    pub fn amount(&self) -> Msat {
        self.parts.iter().map(|p| p.amount).sum()
    }

    /// Aggregate routing fees paid across all parts.
    pub fn fees(&self) -> Msat {
        self.parts.iter().map(|p| p.fees).sum()
    }
}

/// Terminal failure event for a payment lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub id: PaymentId,
    pub payment_hash: PaymentHash,
    /// All recorded failures, in the order their children reported them.
    pub failures: Vec<FailureRecord>,
}

/// The single terminal event of a payment lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    Sent(PaymentSent),
    Failed(PaymentFailed),
}

impl PaymentOutcome {
    pub fn id(&self) -> PaymentId {
        match self {
            PaymentOutcome::Sent(s) => s.id,
            PaymentOutcome::Failed(f) => f.id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PaymentOutcome::Sent(_))
    }
}

/// Terminal report from a child worker back to the coordinator. Each
/// worker sends exactly one of these per child id.
#[derive(Debug, Clone)]
pub enum ChildOutcome {
    Sent {
        child_id: ChildId,
        payment_hash: PaymentHash,
        preimage: PaymentPreimage,
        parts: Vec<PartialPayment>,
    },
    Failed {
        child_id: ChildId,
        payment_hash: PaymentHash,
        failures: Vec<FailureRecord>,
    },
}

impl ChildOutcome {
    pub fn child_id(&self) -> ChildId {
        match self {
            ChildOutcome::Sent { child_id, .. } => *child_id,
            ChildOutcome::Failed { child_id, .. } => *child_id,
        }
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Serializes a `[u8; 32]` as a lowercase hex string.
mod serde_hex32 {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(|e| Error::custom(e.to_string()))?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| Error::custom(format!("expected 32 bytes, got {}", v.len())))
    }
}
