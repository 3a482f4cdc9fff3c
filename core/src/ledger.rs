//! Sponsorship lifecycle flows.
//!
//! [`SponsorshipLedger`] decides; [`SponsorshipStore`] commits. Every commit that touches a
//! usage recomputes the registration's `sponsorship_amount` from the sum of its usages and the
//! sponsorship's status from its usage count inside one transaction, and re-checks for a
//! concurrent cancellation before writing.

use crate::capacity::{DEFAULT_STORE_TIMEOUT, StoreFuture, bounded};
use crate::config::{EngineConfig, SponsorshipConfig};
use crate::error::{AccessError, Result};
use crate::sponsorship::{assess_coverage, calculate_sponsorship_total, generate_unique_code};
use crate::types::{
    AccessId, AccessItem, EventId, Money, RegistrationId, RegistrationSnapshot, Sponsorship,
    SponsorshipId, SponsorshipStatus, SponsorshipUsage,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Store Contract
// ============================================================================

/// A registration's recomputed sponsorship credit after a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCredit {
    /// Registration
    pub registration_id: RegistrationId,
    /// Sum of the registration's remaining usages
    pub sponsorship_amount: Money,
}

/// Outcome of committing a new usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkCommit {
    /// Usage inserted
    Linked {
        /// Registration credit recomputed from usages
        credit: RegistrationCredit,
        /// Sponsorship status recomputed from usages
        status: SponsorshipStatus,
    },
    /// A usage for this pair already exists
    AlreadyLinked,
    /// The sponsorship was cancelled before the transaction took its lock
    Cancelled,
    /// Sponsorship or registration vanished
    Missing,
}

/// Outcome of removing a usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnlinkCommit {
    /// Usage removed
    Unlinked {
        /// Amount the usage had applied
        amount_removed: Money,
        /// Registration credit recomputed from usages
        credit: RegistrationCredit,
        /// Sponsorship status recomputed from usages
        status: SponsorshipStatus,
    },
    /// No usage for this pair
    NotLinked,
}

/// Outcome of cancelling a sponsorship.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelCommit {
    /// Status set to cancelled and every usage removed
    Cancelled {
        /// Each affected registration's recomputed credit
        affected: Vec<RegistrationCredit>,
    },
    /// Already cancelled; nothing changed
    AlreadyCancelled,
    /// No such sponsorship
    Missing,
}

/// Outcome of rewriting a sponsorship's coverage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoverageCommit {
    /// Coverage and total updated
    Updated {
        /// Registrations whose usage was capped at the new total, with their new credit
        recapped: Vec<RegistrationCredit>,
    },
    /// Cancelled; nothing changed
    Cancelled,
    /// No such sponsorship
    Missing,
}

/// Persistence for sponsorships, usages and registration credits.
///
/// `commit_*` methods are each one transaction. They lock the sponsorship row before acting
/// so a concurrent cancel is observed rather than overwritten.
pub trait SponsorshipStore: Send + Sync {
    /// Whether any sponsorship already uses `code`.
    fn code_exists<'a>(&'a self, code: &'a str) -> StoreFuture<'a, bool>;

    /// Insert a batch of new sponsorships atomically.
    fn insert_sponsorships(&self, sponsorships: Vec<Sponsorship>) -> StoreFuture<'_, ()>;

    /// Load one sponsorship.
    fn load_sponsorship(&self, id: SponsorshipId) -> StoreFuture<'_, Option<Sponsorship>>;

    /// Load the coverage-relevant view of a registration.
    fn load_registration(
        &self,
        id: RegistrationId,
    ) -> StoreFuture<'_, Option<RegistrationSnapshot>>;

    /// Sponsorships with a usage on `registration_id`.
    fn load_linked_sponsorships(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Vec<Sponsorship>>;

    /// Insert `usage`, then recompute credit and status.
    fn commit_link(&self, usage: SponsorshipUsage) -> StoreFuture<'_, LinkCommit>;

    /// Delete the usage for the pair, then recompute credit and status.
    fn commit_unlink(
        &self,
        sponsorship_id: SponsorshipId,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, UnlinkCommit>;

    /// Mark cancelled, delete every usage, recompute each affected credit.
    fn commit_cancel(&self, sponsorship_id: SponsorshipId) -> StoreFuture<'_, CancelCommit>;

    /// Replace coverage and total unless cancelled, cap every usage of the sponsorship at the
    /// new total, and recompute the credit of each registration whose usage shrank.
    fn commit_coverage(
        &self,
        sponsorship_id: SponsorshipId,
        covers_base_price: bool,
        covered_access_ids: BTreeSet<AccessId>,
        total_amount: Money,
    ) -> StoreFuture<'_, CoverageCommit>;
}

// ============================================================================
// Ledger Flows
// ============================================================================

/// Requested coverage for one sponsorship in a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipRequest {
    /// Cover the registration base fee
    pub covers_base_price: bool,
    /// Cover these access items
    pub covered_access_ids: BTreeSet<AccessId>,
}

/// Result of linking a sponsorship to a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResult {
    /// Amount credited by the new usage
    pub amount_applied: Money,
    /// Overlap and consistency warnings
    pub warnings: Vec<String>,
    /// Registration credit after the link
    pub registration_sponsorship_amount: Money,
    /// Sponsorship status after the link
    pub status: SponsorshipStatus,
}

/// Result of unlinking a sponsorship from a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkResult {
    /// Amount the removed usage had applied
    pub amount_removed: Money,
    /// Registration credit after the unlink
    pub registration_sponsorship_amount: Money,
    /// Sponsorship status after the unlink
    pub status: SponsorshipStatus,
}

/// Result of cancelling a sponsorship.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResult {
    /// Registrations that lost a usage, with their new credit
    pub affected: Vec<RegistrationCredit>,
    /// The sponsorship was already cancelled
    pub already_cancelled: bool,
}

/// Result of editing a sponsorship's coverage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageUpdate {
    /// The sponsorship with its new coverage and total
    pub sponsorship: Sponsorship,
    /// Registrations whose usage was capped at the new total, with their new credit
    pub recapped: Vec<RegistrationCredit>,
}

/// Sponsorship lifecycle operations over a [`SponsorshipStore`].
///
/// Every store call is bounded by the store timeout, [`DEFAULT_STORE_TIMEOUT`] unless
/// configured otherwise.
#[derive(Clone)]
pub struct SponsorshipLedger {
    store: Arc<dyn SponsorshipStore>,
    config: SponsorshipConfig,
    timeout: Duration,
}

impl SponsorshipLedger {
    /// Creates a ledger over `store`.
    #[must_use]
    pub const fn new(store: Arc<dyn SponsorshipStore>, config: SponsorshipConfig) -> Self {
        Self::with_timeout(store, config, DEFAULT_STORE_TIMEOUT)
    }

    /// Creates a ledger from the engine configuration.
    #[must_use]
    pub fn from_config(store: Arc<dyn SponsorshipStore>, config: &EngineConfig) -> Self {
        Self::with_timeout(store, config.sponsorship.clone(), config.store_timeout())
    }

    /// Creates a ledger with an explicit store timeout.
    #[must_use]
    pub const fn with_timeout(
        store: Arc<dyn SponsorshipStore>,
        config: SponsorshipConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            config,
            timeout,
        }
    }

    /// Create one pending sponsorship per request with a fresh code and frozen total.
    ///
    /// # Errors
    ///
    /// - [`AccessError::BadRequest`] if a request covers nothing
    /// - [`AccessError::AccessNotFound`] if a covered id is not an item of the event
    /// - [`AccessError::Conflict`] if no unused code could be drawn
    /// - [`AccessError::Store`] on storage failure
    #[tracing::instrument(skip(self, requests, items), fields(event_id = %event_id, count = requests.len()))]
    pub async fn create_batch(
        &self,
        event_id: EventId,
        requests: &[SponsorshipRequest],
        base_price: Money,
        items: &[AccessItem],
    ) -> Result<Vec<Sponsorship>> {
        let event_items: HashSet<AccessId> = items
            .iter()
            .filter(|item| item.event_id == event_id)
            .map(|item| item.id)
            .collect();

        for request in requests {
            if !request.covers_base_price && request.covered_access_ids.is_empty() {
                return Err(AccessError::BadRequest(
                    "sponsorship must cover the base price or at least one access item"
                        .to_string(),
                ));
            }
            if let Some(unknown) = request
                .covered_access_ids
                .iter()
                .find(|id| !event_items.contains(id))
            {
                return Err(AccessError::AccessNotFound(*unknown));
            }
        }

        let mut codes = HashSet::new();
        let mut sponsorships = Vec::with_capacity(requests.len());
        for request in requests {
            let code = generate_unique_code(
                self.store.as_ref(),
                self.config.code_max_attempts,
                &codes,
                self.timeout,
            )
            .await?;
            codes.insert(code.clone());

            sponsorships.push(Sponsorship {
                id: SponsorshipId::new(),
                event_id,
                code,
                covers_base_price: request.covers_base_price,
                covered_access_ids: request.covered_access_ids.clone(),
                total_amount: calculate_sponsorship_total(
                    base_price,
                    request.covers_base_price,
                    &request.covered_access_ids,
                    items,
                ),
                status: SponsorshipStatus::Pending,
            });
        }

        bounded(self.timeout, self.store.insert_sponsorships(sponsorships.clone())).await?;
        tracing::info!(count = sponsorships.len(), "Sponsorship batch created");
        Ok(sponsorships)
    }

    /// Apply a sponsorship to a registration.
    ///
    /// # Errors
    ///
    /// - [`AccessError::SponsorshipNotFound`] / [`AccessError::RegistrationNotFound`]
    /// - [`AccessError::BadRequest`] if they belong to different events
    /// - [`AccessError::SponsorshipStatusConflict`] if the sponsorship is (or becomes)
    ///   cancelled
    /// - [`AccessError::Conflict`] if already linked
    /// - [`AccessError::SponsorshipNotApplicable`] if nothing charged is covered
    /// - [`AccessError::Store`] on storage failure
    #[tracing::instrument(skip(self), fields(sponsorship_id = %sponsorship_id, registration_id = %registration_id))]
    pub async fn link(
        &self,
        sponsorship_id: SponsorshipId,
        registration_id: RegistrationId,
    ) -> Result<LinkResult> {
        let sponsorship = bounded(self.timeout, self.store.load_sponsorship(sponsorship_id))
            .await?
            .ok_or(AccessError::SponsorshipNotFound(sponsorship_id))?;
        if sponsorship.status == SponsorshipStatus::Cancelled {
            return Err(status_conflict(sponsorship_id));
        }

        let registration = bounded(self.timeout, self.store.load_registration(registration_id))
            .await?
            .ok_or(AccessError::RegistrationNotFound(registration_id))?;
        if registration.event_id != sponsorship.event_id {
            return Err(AccessError::BadRequest(format!(
                "sponsorship {} belongs to another event",
                sponsorship.code
            )));
        }

        let existing = bounded(
            self.timeout,
            self.store.load_linked_sponsorships(registration_id),
        )
        .await?;
        if existing.iter().any(|linked| linked.id == sponsorship_id) {
            return Err(already_linked(&sponsorship.code));
        }

        let coverage = assess_coverage(&existing, &sponsorship, &registration);
        if coverage.applicable_amount.is_zero() {
            return Err(AccessError::SponsorshipNotApplicable {
                code: sponsorship.code,
                registration_id,
            });
        }

        let usage = SponsorshipUsage {
            sponsorship_id,
            registration_id,
            amount_applied: coverage.applicable_amount,
        };
        match bounded(self.timeout, self.store.commit_link(usage)).await? {
            LinkCommit::Linked { credit, status } => {
                tracing::info!(
                    amount_applied = coverage.applicable_amount.cents(),
                    sponsorship_amount = credit.sponsorship_amount.cents(),
                    warnings = coverage.warnings.len(),
                    "Sponsorship linked"
                );
                Ok(LinkResult {
                    amount_applied: coverage.applicable_amount,
                    warnings: coverage.warnings,
                    registration_sponsorship_amount: credit.sponsorship_amount,
                    status,
                })
            }
            LinkCommit::AlreadyLinked => Err(already_linked(&sponsorship.code)),
            LinkCommit::Cancelled => {
                tracing::info!("Sponsorship cancelled while linking");
                Err(status_conflict(sponsorship_id))
            }
            LinkCommit::Missing => Err(AccessError::SponsorshipNotFound(sponsorship_id)),
        }
    }

    /// Remove a sponsorship from a registration.
    ///
    /// # Errors
    ///
    /// - [`AccessError::UsageNotFound`] if they are not linked
    /// - [`AccessError::Store`] on storage failure
    #[tracing::instrument(skip(self), fields(sponsorship_id = %sponsorship_id, registration_id = %registration_id))]
    pub async fn unlink(
        &self,
        sponsorship_id: SponsorshipId,
        registration_id: RegistrationId,
    ) -> Result<UnlinkResult> {
        match bounded(
            self.timeout,
            self.store.commit_unlink(sponsorship_id, registration_id),
        )
        .await?
        {
            UnlinkCommit::Unlinked {
                amount_removed,
                credit,
                status,
            } => {
                tracing::info!(
                    amount_removed = amount_removed.cents(),
                    sponsorship_amount = credit.sponsorship_amount.cents(),
                    "Sponsorship unlinked"
                );
                Ok(UnlinkResult {
                    amount_removed,
                    registration_sponsorship_amount: credit.sponsorship_amount,
                    status,
                })
            }
            UnlinkCommit::NotLinked => Err(AccessError::UsageNotFound {
                sponsorship_id,
                registration_id,
            }),
        }
    }

    /// Cancel a sponsorship and remove all of its usages. Cancelling twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`AccessError::SponsorshipNotFound`] if absent
    /// - [`AccessError::Store`] on storage failure
    #[tracing::instrument(skip(self), fields(sponsorship_id = %sponsorship_id))]
    pub async fn cancel(&self, sponsorship_id: SponsorshipId) -> Result<CancelResult> {
        match bounded(self.timeout, self.store.commit_cancel(sponsorship_id)).await? {
            CancelCommit::Cancelled { affected } => {
                tracing::info!(affected = affected.len(), "Sponsorship cancelled");
                Ok(CancelResult {
                    affected,
                    already_cancelled: false,
                })
            }
            CancelCommit::AlreadyCancelled => Ok(CancelResult {
                affected: Vec::new(),
                already_cancelled: true,
            }),
            CancelCommit::Missing => Err(AccessError::SponsorshipNotFound(sponsorship_id)),
        }
    }

    /// Replace what a sponsorship covers and recompute its frozen total.
    ///
    /// Existing usages keep the amount they applied when linked unless it exceeds the new
    /// total; those are capped at the new total and their registrations' credit recomputed,
    /// in the same commit.
    ///
    /// # Errors
    ///
    /// - [`AccessError::SponsorshipNotFound`] if absent
    /// - [`AccessError::SponsorshipStatusConflict`] if cancelled
    /// - [`AccessError::BadRequest`] if the new coverage is empty
    /// - [`AccessError::Store`] on storage failure
    #[tracing::instrument(skip(self, covered_access_ids, items), fields(sponsorship_id = %sponsorship_id))]
    pub async fn update_coverage(
        &self,
        sponsorship_id: SponsorshipId,
        covers_base_price: bool,
        covered_access_ids: BTreeSet<AccessId>,
        base_price: Money,
        items: &[AccessItem],
    ) -> Result<CoverageUpdate> {
        let mut sponsorship = bounded(self.timeout, self.store.load_sponsorship(sponsorship_id))
            .await?
            .ok_or(AccessError::SponsorshipNotFound(sponsorship_id))?;
        if sponsorship.status == SponsorshipStatus::Cancelled {
            return Err(status_conflict(sponsorship_id));
        }
        if !covers_base_price && covered_access_ids.is_empty() {
            return Err(AccessError::BadRequest(
                "sponsorship must cover the base price or at least one access item".to_string(),
            ));
        }

        let total_amount =
            calculate_sponsorship_total(base_price, covers_base_price, &covered_access_ids, items);
        match bounded(
            self.timeout,
            self.store.commit_coverage(
                sponsorship_id,
                covers_base_price,
                covered_access_ids.clone(),
                total_amount,
            ),
        )
        .await?
        {
            CoverageCommit::Updated { recapped } => {
                tracing::info!(
                    total_amount = total_amount.cents(),
                    recapped = recapped.len(),
                    "Sponsorship coverage updated"
                );
                sponsorship.covers_base_price = covers_base_price;
                sponsorship.covered_access_ids = covered_access_ids;
                sponsorship.total_amount = total_amount;
                Ok(CoverageUpdate {
                    sponsorship,
                    recapped,
                })
            }
            CoverageCommit::Cancelled => Err(status_conflict(sponsorship_id)),
            CoverageCommit::Missing => Err(AccessError::SponsorshipNotFound(sponsorship_id)),
        }
    }
}

fn status_conflict(sponsorship_id: SponsorshipId) -> AccessError {
    AccessError::SponsorshipStatusConflict {
        sponsorship_id,
        status: SponsorshipStatus::Cancelled,
    }
}

fn already_linked(code: &str) -> AccessError {
    AccessError::Conflict(format!("sponsorship {code} is already linked to this registration"))
}
