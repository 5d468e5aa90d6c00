//! Splits a payment amount across local channels.
//!
//! The splitter is a pure function: given the target amount, a snapshot
//! of usable balances, network capacity statistics and the original
//! request, it produces a set of child payment descriptors whose amounts
//! sum to the covered portion of the target. All randomness comes from a
//! caller-supplied seeded generator, so property tests and production
//! share one code path.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::model::{
    ChildDescriptor, FinalPayload, FirstHop, NetworkStats, RouteParams, SendRequest,
    UsableBalance,
};
use crate::primitives::{BlockHeight, Msat};

/// Outcome of one split pass. `remaining` is zero iff the full amount
/// was allocated to descriptors.
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub remaining: Msat,
    pub descriptors: Vec<ChildDescriptor>,
}

impl SplitResult {
    /// True iff the requested amount is fully covered.
    pub fn is_complete(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// A balance being consumed by the greedy fill, with its running budget.
struct Candidate<'a> {
    balance: &'a UsableBalance,
    /// Sendable budget left on this channel; each fragment deducts
    /// `amount + first_hop_fee` so `can_send >= amount + fee` holds.
    budget: Msat,
    /// Largest single fragment this channel accepts.
    per_fragment_cap: Msat,
    htlc_min: Msat,
}

impl<'a> Candidate<'a> {
    fn available(&self) -> Msat {
        self.budget.min(self.per_fragment_cap)
    }
}

/// Splits `amount` across `balances`, producing at most `amount` worth
/// of child descriptors for `request`.
///
/// When the recipient is a direct peer only channels to that peer are
/// used, no first-hop fee applies and `stats` is ignored; otherwise
/// fragments are sized to the 75th-percentile remote channel capacity,
/// the heuristic being that typical-capacity fragments have the best
/// chance of onward routing. A channel may host several fragments. With
/// `randomize` unset the result is deterministic.
pub fn split(
    amount: Msat,
    balances: &[UsableBalance],
    stats: Option<&NetworkStats>,
    request: &SendRequest,
    block_height: BlockHeight,
    rng: &mut StdRng,
) -> SplitResult {
    if amount.is_zero() {
        return SplitResult {
            remaining: Msat::ZERO,
            descriptors: Vec::new(),
        };
    }

    // A request without an invoice has no payment secret to put in the
    // final payload, so no child can be built from it.
    let payment_secret = match &request.invoice {
        Some(invoice) => invoice.payment_secret,
        None => {
            return SplitResult {
                remaining: amount,
                descriptors: Vec::new(),
            }
        }
    };

    let route_params = request.route_params();
    let direct = balances.iter().any(|b| b.peer == request.target);

    let fragment_target = if direct {
        // Fragment sizing for direct channels is driven purely by the
        // channel caps below.
        Msat(u64::MAX)
    } else {
        match stats {
            Some(s) if s.capacity.percentile75.sat() > 0 => s.capacity.percentile75.to_msat(),
            _ => Msat(u64::MAX),
        }
    };

    let mut candidates: Vec<Candidate<'_>> = balances
        .iter()
        .filter(|b| !direct || b.peer == request.target)
        .filter(|b| eligible(b, direct, &route_params))
        .map(|b| Candidate {
            balance: b,
            budget: b.can_send,
            per_fragment_cap: b.channel_update.htlc_maximum.unwrap_or(Msat(u64::MAX)),
            htlc_min: b.channel_update.htlc_minimum,
        })
        .collect();

    if route_params.randomize {
        candidates.shuffle(rng);
    } else {
        candidates.sort_by(|a, b| {
            b.available()
                .cmp(&a.available())
                .then(a.balance.short_channel_id.cmp(&b.balance.short_channel_id))
        });
    }

    // Fragments as (candidate index, amount); descriptors are
    // materialized once the fill is done.
    let mut fragments: Vec<(usize, Msat)> = Vec::new();
    let mut remaining = amount;

    'fill: loop {
        let mut progressed = false;
        for idx in 0..candidates.len() {
            if remaining.is_zero() {
                break 'fill;
            }
            let htlc_min = candidates[idx].htlc_min;

            if remaining < htlc_min {
                // The residue is below this channel's minimum; fold it
                // into an earlier fragment whose channel still has room.
                if merge_residue(
                    &mut fragments,
                    &mut candidates,
                    remaining,
                    &route_params,
                    direct,
                ) {
                    remaining = Msat::ZERO;
                    break 'fill;
                }
                continue;
            }

            let cand = &mut candidates[idx];
            let Some(mut fragment) = max_fragment(cand, remaining, fragment_target, direct)
            else {
                continue;
            };
            if fragment < htlc_min {
                continue;
            }
            if !fits_fee_budget(cand, fragment, &route_params, direct) {
                continue;
            }

            // Avoid leaving a residue no channel could accept: grow the
            // fragment to swallow a sub-minimum leftover when caps allow.
            // The grown amount pays a higher fee, so the fee budget is
            // checked again at the new size.
            let leftover = remaining.saturating_sub(fragment);
            if !leftover.is_zero() && leftover < htlc_min {
                let grown = fragment + leftover;
                if grown <= cand.per_fragment_cap
                    && grown + first_hop_fee(cand, grown, direct) <= cand.budget
                    && fits_fee_budget(cand, grown, &route_params, direct)
                {
                    fragment = grown;
                }
            }

            let fee = first_hop_fee(cand, fragment, direct);
            cand.budget = cand.budget.saturating_sub(fragment + fee);
            remaining = remaining.saturating_sub(fragment);
            fragments.push((idx, fragment));
            progressed = true;
        }
        if remaining.is_zero() || !progressed {
            break;
        }
    }

    let expiry = request.final_expiry(block_height);
    let descriptors = fragments
        .into_iter()
        .map(|(idx, fragment)| {
            let balance = candidates[idx].balance;
            ChildDescriptor {
                payment_hash: request.payment_hash,
                target: request.target,
                final_payload: FinalPayload {
                    amount: fragment,
                    total_amount: request.amount,
                    expiry,
                    payment_secret,
                },
                max_attempts: request.max_attempts,
                first_hop: FirstHop {
                    peer: balance.peer,
                    short_channel_id: balance.short_channel_id,
                    channel_update: balance.channel_update.clone(),
                },
                route_params: route_params.clone(),
            }
        })
        .collect();

    SplitResult {
        remaining,
        descriptors,
    }
}

/// A channel is eligible unless even its minimum fragment costs more in
/// first-hop fees than the per-part fee budget tolerates.
fn eligible(balance: &UsableBalance, direct: bool, route_params: &RouteParams) -> bool {
    if direct {
        return true;
    }
    let min_fragment = balance.channel_update.htlc_minimum.max(Msat(1));
    let fee = balance.channel_update.fee_for(min_fragment);
    fee <= route_params.max_fee_base + route_params.max_fee_pct.apply_to(min_fragment)
}

fn first_hop_fee(cand: &Candidate<'_>, amount: Msat, direct: bool) -> Msat {
    if direct {
        // The peer is the recipient; nothing is forwarded.
        Msat::ZERO
    } else {
        cand.balance.channel_update.fee_for(amount)
    }
}

/// Whether a fragment of `amount` stays within the per-part fee budget
/// from the route parameters. Must hold for every emitted descriptor,
/// including amounts grown after the initial check.
fn fits_fee_budget(
    cand: &Candidate<'_>,
    amount: Msat,
    route_params: &RouteParams,
    direct: bool,
) -> bool {
    if direct {
        return true;
    }
    let fee = cand.balance.channel_update.fee_for(amount);
    fee <= route_params.max_fee_base + route_params.max_fee_pct.apply_to(amount)
}

/// The largest fragment this candidate can host right now, bounded by
/// the outstanding amount, the fragment target, the per-HTLC cap and the
/// fee-inclusive channel budget. `None` when the budget is spent.
fn max_fragment(
    cand: &Candidate<'_>,
    remaining: Msat,
    fragment_target: Msat,
    direct: bool,
) -> Option<Msat> {
    let cap = remaining.min(cand.per_fragment_cap).min(fragment_target);
    if cap.is_zero() || cand.budget.is_zero() {
        return None;
    }
    if cap + first_hop_fee(cand, cap, direct) <= cand.budget {
        return Some(cap);
    }
    if direct {
        return Some(cap.min(cand.budget));
    }
    // Solve a + base + a*ppm/1e6 <= budget for the largest integer a.
    let update = &cand.balance.channel_update;
    let after_base = cand.budget.checked_sub(update.fee_base)?;
    let a = (after_base.msat() as u128 * 1_000_000
        / (1_000_000 + update.fee_proportional.ppm() as u128)) as u64;
    if a == 0 {
        return None;
    }
    Some(cap.min(Msat(a)))
}

/// Folds a sub-minimum residue into the most recent fragment whose
/// channel still has room for it, at the grown size's fee. Returns true
/// when merged.
fn merge_residue(
    fragments: &mut [(usize, Msat)],
    candidates: &mut [Candidate<'_>],
    residue: Msat,
    route_params: &RouteParams,
    direct: bool,
) -> bool {
    for (idx, fragment) in fragments.iter_mut().rev() {
        let cand = &mut candidates[*idx];
        let grown = *fragment + residue;
        if grown > cand.per_fragment_cap || !fits_fee_budget(cand, grown, route_params, direct) {
            continue;
        }
        let old_fee = first_hop_fee(cand, *fragment, direct);
        let new_fee = first_hop_fee(cand, grown, direct);
        let extra = residue + new_fee.saturating_sub(old_fee);
        if extra <= cand.budget {
            cand.budget = cand.budget.saturating_sub(extra);
            *fragment = grown;
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapacityStats, ChannelUpdate, Invoice, PaymentHash, PaymentSecret};
    use crate::primitives::{Ppm, Sat, ShortChannelId};
    use bitcoin::secp256k1::PublicKey;
    use rand::{Rng, SeedableRng};

    const HEIGHT: BlockHeight = 800_000;

    fn peer_b() -> PublicKey {
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
            .parse()
            .unwrap()
    }

    fn peer_c() -> PublicKey {
        "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5"
            .parse()
            .unwrap()
    }

    fn peer_d() -> PublicKey {
        "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9"
            .parse()
            .unwrap()
    }

    fn remote_e() -> PublicKey {
        "03e7156ae33b0a208d0744199163177e909e80176e55d97a2f221ede0f934dd9ad"
            .parse()
            .unwrap()
    }

    fn update(htlc_min: u64, htlc_max: Option<u64>) -> ChannelUpdate {
        ChannelUpdate {
            fee_base: Msat::ZERO,
            fee_proportional: Ppm::from_ppm(0),
            cltv_expiry_delta: 144,
            htlc_minimum: Msat(htlc_min),
            htlc_maximum: htlc_max.map(Msat),
        }
    }

    fn balance(peer: PublicKey, scid: u64, can_send: u64, update: ChannelUpdate) -> UsableBalance {
        UsableBalance {
            peer,
            short_channel_id: ShortChannelId(scid),
            can_send: Msat(can_send),
            in_flight: Msat::ZERO,
            is_public: true,
            channel_update: update,
        }
    }

    fn request(amount: u64, target: PublicKey) -> SendRequest {
        SendRequest {
            amount: Msat(amount),
            payment_hash: PaymentHash([0xab; 32]),
            target,
            max_attempts: 3,
            min_final_cltv_delta: 12,
            invoice: Some(Invoice {
                payment_secret: PaymentSecret([0x11; 32]),
                min_final_cltv_delta: None,
                basic_mpp: true,
            }),
            route_params: None,
        }
    }

    fn stats(p75_sat: u64) -> NetworkStats {
        NetworkStats {
            capacity: CapacityStats {
                median: Sat(p75_sat / 2),
                percentile75: Sat(p75_sat),
                percentile90: Sat(p75_sat * 2),
                percentile99: Sat(p75_sat * 4),
            },
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_direct_peer_two_channels() {
        // Two channels to the recipient, both capped at 1_000_000 per
        // HTLC: the 2_000_000 request yields two identical children.
        let balances = vec![
            balance(peer_b(), 1, 1_000_000, update(1000, Some(1_000_000))),
            balance(peer_b(), 2, 1_500_000, update(1000, Some(1_000_000))),
        ];
        let req = request(2_000_000, peer_b());

        let result = split(
            Msat(2_000_000),
            &balances,
            Some(&stats(1_000_000)),
            &req,
            HEIGHT,
            &mut rng(),
        );

        assert!(result.is_complete());
        assert_eq!(result.descriptors.len(), 2);
        for d in &result.descriptors {
            assert_eq!(d.amount(), Msat(1_000_000));
            assert_eq!(d.final_payload.total_amount, Msat(2_000_000));
            assert_eq!(d.final_payload.expiry, HEIGHT + 1 + 12);
            assert_eq!(d.first_hop.peer, peer_b());
        }
    }

    #[test]
    fn test_direct_shortcut_excludes_other_peers() {
        // A fat channel to another peer must not be used when the
        // recipient is a direct peer.
        let balances = vec![
            balance(peer_c(), 1, 10_000_000, update(1, None)),
            balance(peer_b(), 2, 500_000, update(1, None)),
        ];
        let req = request(400_000, peer_b());

        let result = split(Msat(400_000), &balances, None, &req, HEIGHT, &mut rng());

        assert!(result.is_complete());
        assert_eq!(result.descriptors.len(), 1);
        assert_eq!(result.descriptors[0].first_hop.peer, peer_b());
    }

    #[test]
    fn test_remote_fragments_to_percentile() {
        // One large channel, 75th percentile 500 sat: the 1_500_000 msat
        // request is cut into 500_000 msat fragments on the same channel.
        let balances = vec![balance(peer_b(), 1, 5_000_000, update(1, None))];
        let req = request(1_500_000, remote_e());

        let result = split(
            Msat(1_500_000),
            &balances,
            Some(&stats(500)),
            &req,
            HEIGHT,
            &mut rng(),
        );

        assert!(result.is_complete());
        assert_eq!(result.descriptors.len(), 3);
        assert!(result.descriptors.iter().all(|d| d.amount() == Msat(500_000)));
    }

    #[test]
    fn test_remote_without_stats_uses_full_channels() {
        let balances = vec![
            balance(peer_b(), 1, 2_000_000, update(1, None)),
            balance(peer_c(), 2, 2_000_000, update(1, None)),
        ];
        let req = request(3_000_000, remote_e());

        let result = split(Msat(3_000_000), &balances, None, &req, HEIGHT, &mut rng());

        assert!(result.is_complete());
        assert_eq!(result.descriptors.len(), 2);
        let total: Msat = result.descriptors.iter().map(|d| d.amount()).sum();
        assert_eq!(total, Msat(3_000_000));
    }

    #[test]
    fn test_first_hop_fee_deducted_from_budget() {
        // 1000 msat base fee: a channel with exactly 1_000_000 sendable
        // can only host 999_000 msat of payment.
        let mut upd = update(1, None);
        upd.fee_base = Msat(1000);
        let balances = vec![balance(peer_b(), 1, 1_000_000, upd)];
        let req = request(1_000_000, remote_e());

        let result = split(Msat(1_000_000), &balances, None, &req, HEIGHT, &mut rng());

        assert_eq!(result.remaining, Msat(1000));
        assert_eq!(result.descriptors.len(), 1);
        let d = &result.descriptors[0];
        let fee = d.first_hop.channel_update.fee_for(d.amount());
        assert!(d.amount() + fee <= Msat(1_000_000));
    }

    #[test]
    fn test_fee_hungry_channel_is_ineligible() {
        // Base fee far above the per-part budget: the channel is skipped
        // entirely and the cheap one carries the payment.
        let mut expensive = update(1, None);
        expensive.fee_base = Msat(100_000);
        let balances = vec![
            balance(peer_b(), 1, 10_000_000, expensive),
            balance(peer_c(), 2, 600_000, update(1, None)),
        ];
        let mut req = request(500_000, remote_e());
        req.route_params = Some(RouteParams {
            max_fee_base: Msat(1000),
            max_fee_pct: Ppm::from_ppm(1000),
            ..RouteParams::default()
        });

        let result = split(Msat(500_000), &balances, None, &req, HEIGHT, &mut rng());

        assert!(result.is_complete());
        assert_eq!(result.descriptors.len(), 1);
        assert_eq!(result.descriptors[0].first_hop.peer, peer_c());
    }

    #[test]
    fn test_sub_minimum_residue_merges_into_earlier_fragment() {
        // Fragment target 1_000_000; the second channel ends up drained
        // to the msat, leaving a 500 msat residue below htlc_minimum.
        // It must be folded back into the first channel's fragment.
        let balances = vec![
            balance(peer_b(), 1, 3_000_000, update(5000, None)),
            balance(peer_c(), 2, 1_000_000, update(5000, None)),
        ];
        let req = request(2_000_500, remote_e());

        let result = split(
            Msat(2_000_500),
            &balances,
            Some(&stats(1000)),
            &req,
            HEIGHT,
            &mut rng(),
        );

        assert!(result.is_complete());
        let total: Msat = result.descriptors.iter().map(|d| d.amount()).sum();
        assert_eq!(total, Msat(2_000_500));
        // The first channel's fragment absorbed the residue.
        assert!(result
            .descriptors
            .iter()
            .any(|d| d.amount() == Msat(1_000_500)));
    }

    #[test]
    fn test_sub_minimum_leftover_folds_into_current_fragment() {
        // A leftover of 500 msat after a target-sized fragment is
        // swallowed by that same fragment when the channel has room.
        let balances = vec![balance(peer_b(), 1, 3_000_000, update(5000, None))];
        let req = request(2_000_500, remote_e());

        let result = split(
            Msat(2_000_500),
            &balances,
            Some(&stats(1000)),
            &req,
            HEIGHT,
            &mut rng(),
        );

        assert!(result.is_complete());
        assert_eq!(result.descriptors.len(), 2);
        let total: Msat = result.descriptors.iter().map(|d| d.amount()).sum();
        assert_eq!(total, Msat(2_000_500));
    }

    #[test]
    fn test_underfunded_returns_residue() {
        let balances = vec![balance(peer_b(), 1, 1_000_000, update(1, Some(400_000)))];
        let req = request(3_000_000, remote_e());

        let result = split(Msat(3_000_000), &balances, None, &req, HEIGHT, &mut rng());

        assert!(!result.is_complete());
        let allocated: Msat = result.descriptors.iter().map(|d| d.amount()).sum();
        assert_eq!(allocated + result.remaining, Msat(3_000_000));
    }

    #[test]
    fn test_no_invoice_yields_no_children() {
        let balances = vec![balance(peer_b(), 1, 1_000_000, update(1, None))];
        let mut req = request(500_000, peer_b());
        req.invoice = None;

        let result = split(Msat(500_000), &balances, None, &req, HEIGHT, &mut rng());

        assert_eq!(result.remaining, Msat(500_000));
        assert!(result.descriptors.is_empty());
    }

    #[test]
    fn test_deterministic_without_randomize() {
        let balances = vec![
            balance(peer_b(), 3, 900_000, update(1, None)),
            balance(peer_c(), 1, 900_000, update(1, None)),
            balance(peer_d(), 2, 1_200_000, update(1, None)),
        ];
        let req = request(2_500_000, remote_e());

        let a = split(Msat(2_500_000), &balances, None, &req, HEIGHT, &mut rng());
        let b = split(Msat(2_500_000), &balances, None, &req, HEIGHT, &mut rng());

        assert_eq!(a.descriptors, b.descriptors);
        // Largest channel first; equal channels tie-break on channel id.
        assert_eq!(
            a.descriptors[0].first_hop.short_channel_id,
            ShortChannelId(2)
        );
        assert_eq!(
            a.descriptors[1].first_hop.short_channel_id,
            ShortChannelId(1)
        );
    }

    #[test]
    fn test_randomize_is_seed_stable() {
        let balances = vec![
            balance(peer_b(), 1, 900_000, update(1, None)),
            balance(peer_c(), 2, 900_000, update(1, None)),
            balance(peer_d(), 3, 1_200_000, update(1, None)),
        ];
        let mut req = request(1_000_000, remote_e());
        req.route_params = Some(RouteParams {
            randomize: true,
            ..RouteParams::default()
        });

        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a = split(Msat(1_000_000), &balances, None, &req, HEIGHT, &mut rng_a);
        let b = split(Msat(1_000_000), &balances, None, &req, HEIGHT, &mut rng_b);

        assert_eq!(a.descriptors, b.descriptors);
        assert!(a.is_complete());
    }

    #[test]
    fn test_split_fuzz_always_allocates_fully() {
        // Randomized totals against a fixed 6_500_000 msat pool with
        // randomized capacity statistics and fee budgets must always be
        // fully allocated.
        let mut seed_rng = StdRng::seed_from_u64(0xfeed);
        let peers = [peer_b(), peer_c(), peer_d()];
        let pool = [2_000_000u64, 1_500_000, 1_300_000, 1_000_000, 700_000];

        for _ in 0..200 {
            let balances: Vec<UsableBalance> = pool
                .iter()
                .enumerate()
                .map(|(i, can_send)| {
                    balance(peers[i % 3], i as u64 + 1, *can_send, update(1, None))
                })
                .collect();

            let total = seed_rng.random_range(1_000..=3_500_000u64);
            let p75 = seed_rng.random_range(400..2_000u64);
            let mut req = request(total, remote_e());
            req.route_params = Some(RouteParams {
                randomize: seed_rng.random_bool(0.5),
                max_fee_base: Msat(seed_rng.random_range(1_000..50_000u64)),
                max_fee_pct: Ppm::from_ppm(seed_rng.random_range(1_000..100_000u32)),
                ..RouteParams::default()
            });

            let mut split_rng = StdRng::seed_from_u64(seed_rng.random::<u64>());
            let result = split(
                Msat(total),
                &balances,
                Some(&stats(p75)),
                &req,
                HEIGHT,
                &mut split_rng,
            );

            assert!(
                result.is_complete(),
                "total {} p75 {} left {}",
                total,
                p75,
                result.remaining
            );
            assert!(!result.descriptors.is_empty());
            let sum: Msat = result.descriptors.iter().map(|d| d.amount()).sum();
            assert_eq!(sum, Msat(total));
        }
    }

    #[test]
    fn test_descriptors_respect_channel_caps() {
        let mut upd_a = update(5_000, Some(800_000));
        upd_a.fee_base = Msat(1000);
        upd_a.fee_proportional = Ppm::from_ppm(500);
        let mut upd_b = update(5_000, Some(600_000));
        upd_b.fee_base = Msat(1000);
        upd_b.fee_proportional = Ppm::from_ppm(500);
        let balances = vec![
            balance(peer_b(), 1, 3_000_000, upd_a),
            balance(peer_c(), 2, 2_000_000, upd_b),
        ];
        let req = request(3_100_000, remote_e());
        let route_params = req.route_params();

        let result = split(
            Msat(3_100_000),
            &balances,
            Some(&stats(700)),
            &req,
            HEIGHT,
            &mut rng(),
        );

        assert!(result.is_complete());
        for d in &result.descriptors {
            let max = d.first_hop.channel_update.htlc_maximum.unwrap();
            assert!(d.amount() <= max);
            assert!(d.amount() >= d.first_hop.channel_update.htlc_minimum);
            let fee = d.first_hop.channel_update.fee_for(d.amount());
            let allowed =
                route_params.max_fee_base + route_params.max_fee_pct.apply_to(d.amount());
            assert!(fee <= allowed);
        }
    }

    #[test]
    fn test_residue_growth_respects_fee_budget() {
        // fee_for(1000) = 61 fits the budget of 15 + 50 = 65, but the
        // 499 msat sub-minimum residue would grow the fragment to 1499,
        // where fee_for(1499) = 91 exceeds 15 + 74 = 89. The growth (and
        // the later merge attempt) must be rejected, leaving the residue
        // unallocated rather than emitting an over-fee descriptor.
        let mut upd = update(500, None);
        upd.fee_proportional = Ppm::from_ppm(61_000);
        let balances = vec![balance(peer_b(), 1, 10_000_000, upd)];
        let mut req = request(1_499, remote_e());
        req.route_params = Some(RouteParams {
            max_fee_base: Msat(15),
            max_fee_pct: Ppm::from_ppm(50_000),
            ..RouteParams::default()
        });
        let route_params = req.route_params();

        let result = split(
            Msat(1_499),
            &balances,
            Some(&stats(1)),
            &req,
            HEIGHT,
            &mut rng(),
        );

        assert_eq!(result.remaining, Msat(499));
        assert_eq!(result.descriptors.len(), 1);
        let d = &result.descriptors[0];
        assert_eq!(d.amount(), Msat(1000));
        let fee = d.first_hop.channel_update.fee_for(d.amount());
        let allowed = route_params.max_fee_base + route_params.max_fee_pct.apply_to(d.amount());
        assert!(fee <= allowed);
    }
}
