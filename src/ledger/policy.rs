//! Settlement policies
//!
//! A policy turns the outcome of one request into a [`SettlementPlan`]. The
//! reference policy rewards in-interval reporters with `+1` reputation and a
//! weight-proportional share of the reward pool, and halves the reputation
//! of reporters the round judged against. Deployments that settle
//! differently plug in their own policy.

use serde::{Deserialize, Serialize};

use super::book::SettlementPlan;
use crate::aggregation::gcd;
use crate::registry::Identity;

/// How a revealed report fared in aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterOutcome {
    pub identity: Identity,
    pub weight: u128,
    pub anomalous: bool,
}

/// Final say on a request's consensus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Below the audit threshold, never disputed
    Accepted,
    /// Audit supermajority upheld the consensus
    Confirmed,
    /// Audit reached no decision, consensus retained
    Deadlocked,
    /// Audit supermajority rejected the consensus
    Overturned,
}

impl Verdict {
    pub fn upholds_consensus(&self) -> bool {
        !matches!(self, Verdict::Overturned)
    }
}

/// Everything a policy needs to settle one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub request_id: u64,
    pub creator: Identity,
    pub reward_pool: u128,
    /// Revealed reporters only. No-shows never appear here.
    pub reporters: Vec<ReporterOutcome>,
    pub verdict: Verdict,
    /// Auditor votes, `true` = support original
    pub audit_votes: Vec<(Identity, bool)>,
}

pub trait SettlementPolicy: Send + Sync {
    /// `reputation` reads the ledger under the settlement lock
    fn plan(&self, outcome: &RoundOutcome, reputation: &dyn Fn(&Identity) -> i64) -> SettlementPlan;
}

/// `+1` and a pro-rata share for honest reporters, `floor(rep / 2)` for
/// reporters judged against
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferencePolicy;

impl SettlementPolicy for ReferencePolicy {
    fn plan(
        &self,
        outcome: &RoundOutcome,
        reputation: &dyn Fn(&Identity) -> i64,
    ) -> SettlementPlan {
        let mut plan = SettlementPlan::default();
        let upheld = outcome.verdict.upholds_consensus();

        let mut rewarded: Vec<&ReporterOutcome> = Vec::new();
        for reporter in &outcome.reporters {
            // When the consensus is overturned the in-interval reporters are
            // the ones audited against; the outliers are left alone.
            let honest = upheld && !reporter.anomalous;
            let penalized = reporter.anomalous == upheld;

            if honest {
                plan.adjust(reporter.identity, 1);
                rewarded.push(reporter);
            } else if penalized {
                plan.adjust(reporter.identity, halving_delta(reputation(&reporter.identity)));
            }
        }

        let weights: Vec<u128> = rewarded.iter().map(|r| r.weight).collect();
        let shares = pro_rata(outcome.reward_pool, &weights);
        let mut distributed = 0u128;
        for (reporter, share) in rewarded.iter().zip(shares) {
            plan.pay(reporter.identity, share);
            distributed += share;
        }
        // Dust, or the whole pool when nobody earned a share
        plan.pay(outcome.creator, outcome.reward_pool - distributed);

        if matches!(outcome.verdict, Verdict::Confirmed | Verdict::Overturned) {
            for (auditor, vote) in &outcome.audit_votes {
                if *vote == upheld {
                    plan.adjust(*auditor, 1);
                } else {
                    plan.adjust(*auditor, halving_delta(reputation(auditor)));
                }
            }
        }

        plan
    }
}

/// Delta taking `rep` to `floor(rep / 2)`. Negative scores move up toward
/// zero: `-3` becomes `-2`.
pub fn halving_delta(rep: i64) -> i64 {
    rep.div_euclid(2) - rep
}

/// Split `pool` as `floor(pool * w_i / sum(w))`.
///
/// Weights are first reduced by their gcd; if a product would still
/// overflow they are halved until it fits.
pub fn pro_rata(pool: u128, weights: &[u128]) -> Vec<u128> {
    let divisor = weights.iter().fold(0u128, |acc, w| gcd(acc, *w)).max(1);
    let mut scaled: Vec<u128> = weights.iter().map(|w| w / divisor).collect();

    let fits = |ws: &[u128]| {
        ws.iter()
            .try_fold(0u128, |acc, w| {
                pool.checked_mul(*w)?;
                acc.checked_add(*w)
            })
            .is_some()
    };
    while !fits(&scaled) {
        for w in scaled.iter_mut() {
            if *w > 1 {
                *w >>= 1;
            }
        }
    }

    let total: u128 = scaled.iter().sum();
    if total == 0 {
        return vec![0; weights.len()];
    }
    scaled.iter().map(|w| pool * w / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn id(n: u8) -> Identity {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Identity::new(bytes)
    }

    fn reporter(n: u8, weight: u128, anomalous: bool) -> ReporterOutcome {
        ReporterOutcome {
            identity: id(n),
            weight,
            anomalous,
        }
    }

    fn deltas(plan: &SettlementPlan) -> HashMap<Identity, i64> {
        plan.rep_targets.iter().copied().zip(plan.rep_deltas.iter().copied()).collect()
    }

    fn paid(plan: &SettlementPlan) -> HashMap<Identity, u128> {
        let mut out = HashMap::new();
        for (p, a) in plan.payees.iter().zip(&plan.amounts) {
            *out.entry(*p).or_insert(0) += a;
        }
        out
    }

    #[test]
    fn test_halving_delta() {
        assert_eq!(halving_delta(10), -5);
        assert_eq!(halving_delta(7), -4);
        assert_eq!(halving_delta(1), -1);
        assert_eq!(halving_delta(0), 0);
        assert_eq!(halving_delta(-3), 1);
        assert_eq!(halving_delta(-4), 2);
        assert_eq!(halving_delta(-1), 0);
        assert_eq!(halving_delta(i64::MIN), i64::MIN.div_euclid(2) - i64::MIN);
    }

    #[test]
    fn test_pro_rata_with_dust() {
        assert_eq!(pro_rata(100, &[1, 1, 1]), vec![33, 33, 33]);
        assert_eq!(pro_rata(100, &[3, 1]), vec![75, 25]);
        assert_eq!(pro_rata(100, &[]), Vec::<u128>::new());
        assert_eq!(pro_rata(100, &[0, 0]), vec![0, 0]);
    }

    #[test]
    fn test_pro_rata_large_fixed_point_weights() {
        let unit = 1_000_000_000_000_000_000u128;
        let pool = 10 * unit;
        let shares = pro_rata(pool, &[unit, 3 * unit]);
        assert_eq!(shares, vec![pool / 4, pool * 3 / 4]);

        let huge = pro_rata(u128::MAX / 2, &[u128::MAX / 3, u128::MAX / 3]);
        assert_eq!(huge[0], huge[1]);
        assert!(huge[0] <= u128::MAX / 4 + 1);
    }

    #[test]
    fn test_reference_policy_accepted_round() {
        let outcome = RoundOutcome {
            request_id: 1,
            creator: id(100),
            reward_pool: 100,
            reporters: vec![reporter(1, 1, false), reporter(2, 1, false), reporter(3, 1, true)],
            verdict: Verdict::Accepted,
            audit_votes: vec![],
        };
        let plan =
            ReferencePolicy.plan(&outcome, &|who: &Identity| if *who == id(3) { 8 } else { 0 });

        let d = deltas(&plan);
        assert_eq!(d[&id(1)], 1);
        assert_eq!(d[&id(2)], 1);
        assert_eq!(d[&id(3)], -4);

        let p = paid(&plan);
        assert_eq!(p[&id(1)], 50);
        assert_eq!(p[&id(2)], 50);
        assert!(!p.contains_key(&id(3)));
        assert_eq!(plan.total_paid(), 100);
    }

    #[test]
    fn test_reference_policy_overturned_round() {
        let outcome = RoundOutcome {
            request_id: 2,
            creator: id(100),
            reward_pool: 90,
            reporters: vec![reporter(1, 1, false), reporter(2, 1, true)],
            verdict: Verdict::Overturned,
            audit_votes: vec![(id(50), false), (id(51), false), (id(52), true)],
        };
        let plan = ReferencePolicy.plan(&outcome, &|_: &Identity| 4);

        let d = deltas(&plan);
        assert_eq!(d[&id(1)], -2, "in-interval reporter was audited against");
        assert!(!d.contains_key(&id(2)));
        assert_eq!(d[&id(50)], 1);
        assert_eq!(d[&id(51)], 1);
        assert_eq!(d[&id(52)], -2);

        assert_eq!(paid(&plan)[&id(100)], 90, "pool returns to creator");
    }

    #[test]
    fn test_reference_policy_deadlock_leaves_auditors() {
        let outcome = RoundOutcome {
            request_id: 3,
            creator: id(100),
            reward_pool: 0,
            reporters: vec![reporter(1, 1, false)],
            verdict: Verdict::Deadlocked,
            audit_votes: vec![(id(50), true), (id(51), false)],
        };
        let plan = ReferencePolicy.plan(&outcome, &|_: &Identity| 0);

        let d = deltas(&plan);
        assert_eq!(d[&id(1)], 1);
        assert!(!d.contains_key(&id(50)));
        assert!(!d.contains_key(&id(51)));
        assert!(plan.payees.is_empty());
    }
}
