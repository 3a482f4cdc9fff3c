//! Capacity and waitlist reservation.
//!
//! Counters are shared by every concurrent checkout, possibly across replicas, so they live
//! behind [`CapacityStore`] and change only through single conditional updates
//! ("increment only if below ceiling", "decrement only if at least `quantity`"). This module
//! never reads a counter and writes it back. A rejected update means "no capacity"; it is
//! reported, never retried.
//!
//! The waitlist counter and the waitlist queue move together: joining queues the registration
//! in the same atomic step that counts it, and a waitlisted release removes its queued quantity
//! with the count. Queue order is an ever-increasing ticket, never the display position.

use crate::config::EngineConfig;
use crate::error::{AccessError, Result, StoreError};
use crate::types::{AccessId, RegistrationId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by storage collaborators.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, StoreError>> + Send + 'a>>;

// ============================================================================
// Store Contract
// ============================================================================

/// Default bound on a single storage call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// What a release gives back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Holding {
    /// Confirmed seats on `registered_count`
    Registered,
    /// A registration's queued entry on `waitlist_count`
    Waitlisted(RegistrationId),
}

/// Outcome of a conditional counter update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterUpdate {
    /// The guard held and the counter changed; `previous` is its value before the update
    Applied {
        /// Counter value before the update
        previous: u32,
    },
    /// The guard failed; nothing changed
    Rejected,
    /// No such item
    Missing,
}

/// Outcome of a conditional waitlist increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitlistJoin {
    /// Joined and queued; `previous` is the waitlist count before joining
    Joined {
        /// Waitlist count before the update
        previous: u32,
    },
    /// The item has no waitlist
    Disabled,
    /// The waitlist lacks room for the quantity
    Full,
    /// No such item
    Missing,
}

/// A waitlisted registration moved onto confirmed capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistPromotion {
    /// Promoted registration
    pub registration_id: RegistrationId,
    /// Item the registration was waiting for
    pub access_id: AccessId,
    /// Quantity moved from waitlist to registered
    pub quantity: u32,
    /// Queue ticket the entry was admitted with
    pub ticket: u64,
}

/// Outcome of a promotion attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// The earliest entry was promoted
    Promoted(WaitlistPromotion),
    /// Nobody is waiting
    NoneWaiting,
    /// The earliest entry does not fit in the remaining capacity
    NoRoom,
    /// No such item
    Missing,
}

/// Authoritative per-item counters.
///
/// Every method must be a single atomic operation at the storage layer (one conditional
/// `UPDATE`, or one transaction for promotion) so that correctness holds across concurrent
/// callers and service replicas.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as `Arc<dyn CapacityStore>`.
pub trait CapacityStore: Send + Sync {
    /// Add `quantity` to `registered_count` if capacity is unlimited or
    /// `max_capacity - registered_count >= quantity`.
    fn try_reserve(&self, access_id: AccessId, quantity: u32) -> StoreFuture<'_, CounterUpdate>;

    /// Add `quantity` to `waitlist_count` if the waitlist is enabled and unlimited or has
    /// `max_waitlist - waitlist_count >= quantity`, and queue `registration_id` behind every
    /// earlier entry in the same step.
    ///
    /// A registration already queued for the item keeps its ticket; its entry grows by
    /// `quantity`.
    fn try_join_waitlist(
        &self,
        access_id: AccessId,
        registration_id: RegistrationId,
        quantity: u32,
    ) -> StoreFuture<'_, WaitlistJoin>;

    /// Give back `quantity` of `holding`.
    ///
    /// [`Holding::Registered`] subtracts from `registered_count` if it is at least `quantity`.
    /// [`Holding::Waitlisted`] also requires the registration's queued entry to hold at least
    /// `quantity`; entry and counter shrink together and an emptied entry leaves the queue.
    fn try_release(
        &self,
        access_id: AccessId,
        quantity: u32,
        holding: Holding,
    ) -> StoreFuture<'_, CounterUpdate>;

    /// Promote the earliest-queued entry (lowest ticket), moving its quantity from
    /// `waitlist_count` to `registered_count` if capacity allows.
    fn promote_next(&self, access_id: AccessId) -> StoreFuture<'_, PromotionOutcome>;
}

// ============================================================================
// Reservation Service
// ============================================================================

/// Whether a reservation got a seat or a queue position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Counted against capacity
    Confirmed,
    /// Counted against the waitlist
    Waitlisted,
}

/// Result of [`CapacityReservation::reserve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResult {
    /// Confirmed or waitlisted
    pub status: ReservationStatus,
    /// 1-based waitlist position when waitlisted, for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl ReservationResult {
    /// A confirmed reservation
    #[must_use]
    pub const fn confirmed() -> Self {
        Self {
            status: ReservationStatus::Confirmed,
            position: None,
        }
    }

    /// A waitlisted reservation at `position`
    #[must_use]
    pub const fn waitlisted(position: u32) -> Self {
        Self {
            status: ReservationStatus::Waitlisted,
            position: Some(position),
        }
    }
}

/// The only component allowed to mutate capacity and waitlist counters.
///
/// Every store call is bounded by the configured timeout; an elapsed timeout surfaces as
/// [`StoreError::Timeout`] and says nothing about capacity.
#[derive(Clone)]
pub struct CapacityReservation {
    store: Arc<dyn CapacityStore>,
    timeout: Duration,
}

impl CapacityReservation {
    /// Creates a reservation service with the configured store timeout.
    #[must_use]
    pub fn new(store: Arc<dyn CapacityStore>, config: &EngineConfig) -> Self {
        Self::with_timeout(store, config.store_timeout())
    }

    /// Creates a reservation service with an explicit store timeout.
    #[must_use]
    pub const fn with_timeout(store: Arc<dyn CapacityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Reserve `quantity` of an item for `registration_id`, falling back to its waitlist when
    /// allowed. A waitlisted reservation is queued for promotion in the same store call.
    ///
    /// # Errors
    ///
    /// - [`AccessError::BadRequest`] for a zero quantity
    /// - [`AccessError::AccessNotFound`] if the item does not exist
    /// - [`AccessError::CapacityExceeded`] if capacity is exhausted and the waitlist was not
    ///   allowed or is disabled
    /// - [`AccessError::WaitlistFull`] if the waitlist lacks room
    /// - [`AccessError::Store`] on storage failure or timeout
    #[tracing::instrument(skip(self), fields(access_id = %access_id, registration_id = %registration_id))]
    pub async fn reserve(
        &self,
        access_id: AccessId,
        registration_id: RegistrationId,
        quantity: u32,
        allow_waitlist: bool,
    ) -> Result<ReservationResult> {
        ensure_positive(quantity)?;

        match bounded(self.timeout, self.store.try_reserve(access_id, quantity)).await? {
            CounterUpdate::Applied { previous } => {
                tracing::debug!(previous, quantity, "Reservation confirmed");
                return Ok(ReservationResult::confirmed());
            }
            CounterUpdate::Missing => return Err(AccessError::AccessNotFound(access_id)),
            CounterUpdate::Rejected => {}
        }

        let capacity_exceeded = AccessError::CapacityExceeded {
            access_id,
            requested: quantity,
        };
        if !allow_waitlist {
            tracing::info!(quantity, "Reservation rejected: capacity exhausted");
            return Err(capacity_exceeded);
        }

        match bounded(
            self.timeout,
            self.store.try_join_waitlist(access_id, registration_id, quantity),
        )
        .await?
        {
            WaitlistJoin::Joined { previous } => {
                let position = previous.saturating_add(1);
                tracing::info!(position, quantity, "Reservation waitlisted");
                Ok(ReservationResult::waitlisted(position))
            }
            WaitlistJoin::Disabled => {
                tracing::info!(quantity, "Reservation rejected: capacity exhausted, no waitlist");
                Err(capacity_exceeded)
            }
            WaitlistJoin::Full => {
                tracing::info!(quantity, "Reservation rejected: waitlist full");
                Err(AccessError::WaitlistFull {
                    access_id,
                    requested: quantity,
                })
            }
            WaitlistJoin::Missing => Err(AccessError::AccessNotFound(access_id)),
        }
    }

    /// Give back `quantity` that `registration_id` held as confirmed seats or, when
    /// `was_waitlisted`, as a queued waitlist entry.
    ///
    /// Returns `false` when the counter (or the registration's queued entry) held less than
    /// `quantity`; nothing changes and no counter goes below zero.
    ///
    /// # Errors
    ///
    /// - [`AccessError::BadRequest`] for a zero quantity
    /// - [`AccessError::AccessNotFound`] if the item does not exist
    /// - [`AccessError::Store`] on storage failure or timeout
    #[tracing::instrument(skip(self), fields(access_id = %access_id, registration_id = %registration_id))]
    pub async fn release(
        &self,
        access_id: AccessId,
        registration_id: RegistrationId,
        quantity: u32,
        was_waitlisted: bool,
    ) -> Result<bool> {
        ensure_positive(quantity)?;
        let holding = if was_waitlisted {
            Holding::Waitlisted(registration_id)
        } else {
            Holding::Registered
        };

        match bounded(
            self.timeout,
            self.store.try_release(access_id, quantity, holding),
        )
        .await?
        {
            CounterUpdate::Applied { previous } => {
                tracing::debug!(was_waitlisted, previous, quantity, "Released");
                Ok(true)
            }
            CounterUpdate::Rejected => {
                tracing::warn!(was_waitlisted, quantity, "Release skipped: holding below quantity");
                Ok(false)
            }
            CounterUpdate::Missing => Err(AccessError::AccessNotFound(access_id)),
        }
    }

    /// Promote the earliest waitlisted registration onto confirmed capacity.
    ///
    /// Returns `None` if nobody is waiting or the earliest entry does not fit yet.
    ///
    /// # Errors
    ///
    /// - [`AccessError::AccessNotFound`] if the item does not exist
    /// - [`AccessError::Store`] on storage failure or timeout
    #[tracing::instrument(skip(self), fields(access_id = %access_id))]
    pub async fn promote_from_waitlist(
        &self,
        access_id: AccessId,
    ) -> Result<Option<WaitlistPromotion>> {
        match bounded(self.timeout, self.store.promote_next(access_id)).await? {
            PromotionOutcome::Promoted(promotion) => {
                tracing::info!(
                    registration_id = %promotion.registration_id,
                    ticket = promotion.ticket,
                    quantity = promotion.quantity,
                    "Promoted from waitlist"
                );
                Ok(Some(promotion))
            }
            PromotionOutcome::NoneWaiting => Ok(None),
            PromotionOutcome::NoRoom => {
                tracing::debug!("Earliest waitlist entry does not fit remaining capacity");
                Ok(None)
            }
            PromotionOutcome::Missing => Err(AccessError::AccessNotFound(access_id)),
        }
    }
}

/// Await a store call for at most `timeout`.
///
/// Store failures become [`AccessError::Store`]; an elapsed timeout becomes
/// [`StoreError::Timeout`], a transient error that says nothing about the outcome.
pub(crate) async fn bounded<T>(timeout: Duration, operation: StoreFuture<'_, T>) -> Result<T> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(outcome) => outcome.map_err(|error| {
            tracing::error!(%error, "Store operation failed");
            AccessError::Store(error)
        }),
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis(), "Store operation timed out");
            Err(AccessError::Store(StoreError::Timeout))
        }
    }
}

fn ensure_positive(quantity: u32) -> Result<()> {
    if quantity == 0 {
        Err(AccessError::BadRequest(
            "quantity must be at least 1".to_string(),
        ))
    } else {
        Ok(())
    }
}
