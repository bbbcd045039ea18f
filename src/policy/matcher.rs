//! Rule matching between contract requests and provider offers
//!
//! Two rule lists match when they are equal as sets under semantic rule
//! equality (kind, target, condition; assignment and signature fields
//! ignored). Both sides are deduplicated before comparison, so ordering
//! and duplicate entries representing the same logical rule do not
//! matter. An absent rule list and an empty one are treated as
//! equivalent - both dedupe to the empty set.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{ContractOffer, Rule};

/// Outcome of searching a provider's offers for a consumer request
#[derive(Debug)]
pub enum MatchOutcome {
    /// An offer covers the requested rules; its validity end is the
    /// agreement's end date.
    Matched(ContractOffer),
    /// No offers exist for the target at all (hard reject).
    NoOffersForTarget,
    /// Offers exist but none covers the requested rules (soft reject,
    /// retryable with a revised request).
    RulesMismatch,
}

/// Build a canonical unique list: later duplicates of the same logical
/// rule are dropped.
fn dedupe(rules: &[Rule]) -> Vec<&Rule> {
    let mut unique: Vec<&Rule> = Vec::new();
    for rule in rules {
        if !unique.iter().any(|seen| seen.same_policy(rule)) {
            unique.push(rule);
        }
    }
    unique
}

/// Unordered set equality under semantic rule equality.
///
/// Commutative and duplicate-insensitive: `rules_match(a, b)` equals
/// `rules_match(b, a)`, and repeating a logical rule on either side
/// changes nothing.
pub fn rules_match(left: &[Rule], right: &[Rule]) -> bool {
    let left_set = dedupe(left);
    let right_set = dedupe(right);

    if left_set.len() != right_set.len() {
        return false;
    }

    left_set
        .iter()
        .all(|l| right_set.iter().any(|r| l.same_policy(r)))
}

/// Locate the offer whose rule set matches the rules requested for
/// `target`.
///
/// Offers whose validity interval does not cover `now` or whose consumer
/// restriction excludes `issuer` are discarded first. When several offers
/// match, the one with the earliest end timestamp wins - the tightest
/// grant.
pub fn find_matching_offer(
    offers: &[ContractOffer],
    requested: &[Rule],
    target: &str,
    issuer: &str,
    now: DateTime<Utc>,
) -> MatchOutcome {
    if offers.is_empty() {
        return MatchOutcome::NoOffersForTarget;
    }

    let candidates: Vec<&ContractOffer> = offers
        .iter()
        .filter(|offer| offer.is_valid_at(now))
        .filter(|offer| offer.admits_consumer(issuer))
        .collect();

    if candidates.is_empty() {
        debug!(artifact = target, issuer, "all offers expired or restricted");
        return MatchOutcome::NoOffersForTarget;
    }

    let mut best: Option<&ContractOffer> = None;
    for offer in candidates {
        let offer_rules: Vec<Rule> = offer
            .rules
            .iter()
            .filter(|rule| rule.target == target)
            .cloned()
            .collect();

        if !rules_match(&offer_rules, requested) {
            continue;
        }

        best = match best {
            Some(current) if current.end <= offer.end => Some(current),
            _ => Some(offer),
        };
    }

    match best {
        Some(offer) => MatchOutcome::Matched(offer.clone()),
        None => {
            debug!(artifact = target, "offers exist but rules mismatch");
            MatchOutcome::RulesMismatch
        }
    }
}
