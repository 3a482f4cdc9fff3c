//! Sponsorship coverage arithmetic.
//!
//! Pure functions over [`Sponsorship`] and [`RegistrationSnapshot`]: codes, frozen totals,
//! the amount a sponsorship actually covers on a given registration, and overlap warnings
//! between sponsorships applied to the same registration.

use crate::capacity::bounded;
use crate::error::{AccessError, Result};
use crate::ledger::SponsorshipStore;
use crate::types::{
    AccessId, AccessItem, Money, RegistrationSnapshot, Sponsorship, SponsorshipStatus,
    SponsorshipUsage,
};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

/// Characters a code is drawn from. `O`, `I`, `L`, `0` and `1` are excluded as easily
/// confused when read aloud or handwritten.
pub const CODE_ALPHABET: &str = "ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Prefix of every sponsorship code.
pub const CODE_PREFIX: &str = "SP-";

/// Random characters after the prefix.
pub const CODE_LENGTH: usize = 4;

/// Draw a code of the form `SP-XXXX`.
#[must_use]
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let alphabet = CODE_ALPHABET.as_bytes();
    let mut code = String::with_capacity(CODE_PREFIX.len() + CODE_LENGTH);
    code.push_str(CODE_PREFIX);
    for _ in 0..CODE_LENGTH {
        code.push(char::from(alphabet[rng.gen_range(0..alphabet.len())]));
    }
    code
}

/// Draw codes until one is neither in `pending` nor known to the store, giving up after
/// `max_attempts`. Each existence check is bounded by `timeout`.
///
/// `pending` holds codes drawn for a batch that is not yet committed.
///
/// # Errors
///
/// - [`AccessError::Conflict`] if every attempt collided
/// - [`AccessError::Store`] if the existence check fails or times out
pub async fn generate_unique_code(
    store: &dyn SponsorshipStore,
    max_attempts: u32,
    pending: &HashSet<String>,
    timeout: Duration,
) -> Result<String> {
    for attempt in 1..=max_attempts {
        let code = generate_code(&mut rand::thread_rng());
        if !pending.contains(&code) && !bounded(timeout, store.code_exists(&code)).await? {
            return Ok(code);
        }
        tracing::warn!(attempt, max_attempts, "Sponsorship code collision, retrying");
    }
    Err(AccessError::Conflict(format!(
        "no unused sponsorship code after {max_attempts} attempts"
    )))
}

/// Frozen total of a sponsorship: the base price if covered plus the current price of each
/// covered, active item.
#[must_use]
pub fn calculate_sponsorship_total(
    base_price: Money,
    covers_base_price: bool,
    covered_access_ids: &BTreeSet<AccessId>,
    items: &[AccessItem],
) -> Money {
    let base = if covers_base_price {
        base_price
    } else {
        Money::ZERO
    };
    let access: Money = items
        .iter()
        .filter(|item| item.active && covered_access_ids.contains(&item.id))
        .map(|item| item.price)
        .sum();
    base.saturating_add(access)
}

/// Base fee a sponsorship would cover on `registration`.
///
/// The checkout breakdown is authoritative; the stored `base_amount` is used only for
/// registrations that never got a breakdown.
fn covered_base(sponsorship: &Sponsorship, registration: &RegistrationSnapshot) -> Money {
    if !sponsorship.covers_base_price {
        return Money::ZERO;
    }
    registration
        .price_breakdown
        .as_ref()
        .map_or(registration.base_amount, |breakdown| {
            breakdown.calculated_base_price
        })
}

/// Amount `sponsorship` covers on `registration`, capped at the smaller of the sponsorship
/// total and the registration total.
#[must_use]
pub fn calculate_applicable_amount(
    sponsorship: &Sponsorship,
    registration: &RegistrationSnapshot,
) -> Money {
    let access: Money = registration
        .price_breakdown
        .iter()
        .flat_map(|breakdown| &breakdown.access_items)
        .filter(|charge| {
            registration.access_type_ids.contains(&charge.access_id)
                && sponsorship.covered_access_ids.contains(&charge.access_id)
        })
        .map(|charge| charge.subtotal)
        .sum();

    covered_base(sponsorship, registration)
        .saturating_add(access)
        .min(sponsorship.total_amount)
        .min(registration.total_amount)
}

/// Warnings for coverage `new` shares with sponsorships already applied to the registration.
#[must_use]
pub fn detect_coverage_overlap(existing: &[Sponsorship], new: &Sponsorship) -> Vec<String> {
    let others: Vec<&Sponsorship> = existing.iter().filter(|s| s.id != new.id).collect();
    let mut warnings = Vec::new();

    if new.covers_base_price {
        for other in others.iter().filter(|s| s.covers_base_price) {
            warnings.push(format!(
                "Base price is already covered by sponsorship {}",
                other.code
            ));
        }
    }

    let mut shared: BTreeMap<AccessId, Vec<&str>> = BTreeMap::new();
    for other in &others {
        for access_id in other.covered_access_ids.intersection(&new.covered_access_ids) {
            shared.entry(*access_id).or_default().push(other.code.as_str());
        }
    }
    for (access_id, codes) in shared {
        warnings.push(format!(
            "Access item {access_id} is already covered by sponsorship {}",
            codes.join(", ")
        ));
    }

    warnings
}

/// Sum of `amount_applied` across usages.
#[must_use]
pub fn calculate_total_sponsorship_amount(usages: &[SponsorshipUsage]) -> Money {
    usages.iter().map(|usage| usage.amount_applied).sum()
}

/// Status implied by `usage_count`. `Cancelled` is sticky.
#[must_use]
pub const fn determine_sponsorship_status(
    current: SponsorshipStatus,
    usage_count: usize,
) -> SponsorshipStatus {
    match current {
        SponsorshipStatus::Cancelled => SponsorshipStatus::Cancelled,
        _ if usage_count > 0 => SponsorshipStatus::Used,
        _ => SponsorshipStatus::Pending,
    }
}

/// What applying a sponsorship to a registration would credit, with warnings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageResult {
    /// Amount that would be credited
    pub applicable_amount: Money,
    /// Overlap and consistency warnings
    pub warnings: Vec<String>,
}

/// Compute the applicable amount and every warning for linking `sponsorship` to
/// `registration`, given the sponsorships already linked to it.
#[must_use]
pub fn assess_coverage(
    existing: &[Sponsorship],
    sponsorship: &Sponsorship,
    registration: &RegistrationSnapshot,
) -> CoverageResult {
    let mut warnings = detect_coverage_overlap(existing, sponsorship);

    let diverging = registration
        .price_breakdown
        .as_ref()
        .filter(|breakdown| breakdown.calculated_base_price != registration.base_amount);
    if let (true, Some(breakdown)) = (sponsorship.covers_base_price, diverging) {
        tracing::warn!(
            registration_id = %registration.id,
            breakdown_base = breakdown.calculated_base_price.cents(),
            stored_base = registration.base_amount.cents(),
            "Registration base price diverges from its price breakdown"
        );
        warnings.push(format!(
            "Registration base price {} differs from its price breakdown {}; the breakdown is used",
            registration.base_amount, breakdown.calculated_base_price
        ));
    }

    CoverageResult {
        applicable_amount: calculate_applicable_amount(sponsorship, registration),
        warnings,
    }
}
