//! In-memory store implementations for fast, deterministic tests.
//!
//! - [`InMemoryAccessStore`]: access items and their counters, implementing both
//!   [`CapacityStore`] and [`AccessCatalog`] over one map so validation and reservation see
//!   the same numbers
//! - [`InMemorySponsorshipStore`]: sponsorships, usages and registration credits
//!
//! Each operation takes the lock once and finishes before releasing it, which gives the same
//! all-or-nothing behaviour the Postgres stores get from conditional updates and transactions.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use event_access_core::capacity::{
    CapacityStore, CounterUpdate, Holding, PromotionOutcome, StoreFuture, WaitlistJoin,
    WaitlistPromotion,
};
use event_access_core::catalog::AccessCatalog;
use event_access_core::error::StoreError;
use event_access_core::ledger::{
    CancelCommit, CoverageCommit, LinkCommit, RegistrationCredit, SponsorshipStore, UnlinkCommit,
};
use event_access_core::sponsorship::{
    calculate_total_sponsorship_amount, determine_sponsorship_status,
};
use event_access_core::types::{
    AccessId, AccessItem, EventId, Money, RegistrationId, RegistrationSnapshot, Sponsorship,
    SponsorshipId, SponsorshipStatus, SponsorshipUsage,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Access Items and Counters
// ============================================================================

#[derive(Debug, Default)]
struct AccessState {
    items: Vec<AccessItem>,
    // access id -> ticket -> (registration, quantity)
    waitlists: HashMap<AccessId, BTreeMap<u64, (RegistrationId, u32)>>,
    next_ticket: u64,
    failure: Option<StoreError>,
    latency: Option<Duration>,
}

impl AccessState {
    fn item_mut(&mut self, access_id: AccessId) -> Option<&mut AccessItem> {
        self.items.iter_mut().find(|item| item.id == access_id)
    }

    fn queued_ticket(&self, access_id: AccessId, registration_id: RegistrationId) -> Option<u64> {
        self.waitlists.get(&access_id).and_then(|queue| {
            queue
                .iter()
                .find(|(_, (id, _))| *id == registration_id)
                .map(|(ticket, _)| *ticket)
        })
    }

    fn enqueue(&mut self, access_id: AccessId, registration_id: RegistrationId, quantity: u32) {
        if let Some(ticket) = self.queued_ticket(access_id, registration_id) {
            if let Some(entry) = self
                .waitlists
                .get_mut(&access_id)
                .and_then(|queue| queue.get_mut(&ticket))
            {
                entry.1 += quantity;
            }
            return;
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.waitlists
            .entry(access_id)
            .or_default()
            .insert(ticket, (registration_id, quantity));
    }

    fn leave_waitlist(
        &mut self,
        access_id: AccessId,
        registration_id: RegistrationId,
        quantity: u32,
    ) -> CounterUpdate {
        let ticket = self.queued_ticket(access_id, registration_id);
        let Some(item) = self.items.iter_mut().find(|item| item.id == access_id) else {
            return CounterUpdate::Missing;
        };
        let Some(queue) = self.waitlists.get_mut(&access_id) else {
            return CounterUpdate::Rejected;
        };
        let Some((ticket, entry)) = ticket.and_then(|t| queue.get_mut(&t).map(|e| (t, e))) else {
            return CounterUpdate::Rejected;
        };

        let previous = item.waitlist_count;
        if entry.1 < quantity || previous < quantity {
            return CounterUpdate::Rejected;
        }
        item.waitlist_count = previous - quantity;
        entry.1 -= quantity;
        if entry.1 == 0 {
            queue.remove(&ticket);
        }
        CounterUpdate::Applied { previous }
    }
}

/// In-memory access item store.
///
/// # Example
///
/// ```
/// use event_access_core::capacity::{CapacityStore, CounterUpdate};
/// use event_access_core::types::{AccessItem, AccessType, EventId, Money};
/// use event_access_testing::InMemoryAccessStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryAccessStore::new();
/// let mut item = AccessItem::new(EventId::new(), AccessType::Dinner, "Dinner", Money::ZERO, "EUR");
/// item.max_capacity = Some(1);
/// let id = item.id;
/// store.insert(item);
///
/// assert!(matches!(store.try_reserve(id, 1).await, Ok(CounterUpdate::Applied { previous: 0 })));
/// assert_eq!(store.try_reserve(id, 1).await, Ok(CounterUpdate::Rejected));
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryAccessStore {
    state: Arc<Mutex<AccessState>>,
}

impl InMemoryAccessStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `items`
    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = AccessItem>) -> Self {
        let store = Self::new();
        for item in items {
            store.insert(item);
        }
        store
    }

    /// Insert or replace an item
    pub fn insert(&self, item: AccessItem) {
        let mut state = self.state.lock().unwrap();
        match state.item_mut(item.id) {
            Some(existing) => *existing = item,
            None => state.items.push(item),
        }
    }

    /// Current snapshot of an item
    #[must_use]
    pub fn item(&self, access_id: AccessId) -> Option<AccessItem> {
        let state = self.state.lock().unwrap();
        state.items.iter().find(|item| item.id == access_id).cloned()
    }

    /// Registrations still waiting for `access_id`, earliest first
    #[must_use]
    pub fn waiting(&self, access_id: AccessId) -> Vec<RegistrationId> {
        let state = self.state.lock().unwrap();
        state
            .waitlists
            .get(&access_id)
            .map(|queue| queue.values().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    /// Make every subsequent operation fail with `error` (`None` to recover)
    pub fn fail_with(&self, error: Option<StoreError>) {
        self.state.lock().unwrap().failure = error;
    }

    /// Delay every subsequent operation by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().unwrap().latency = latency;
    }

    fn run<T, F>(&self, operation: F) -> StoreFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut AccessState) -> T + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let latency = state.lock().unwrap().latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let mut guard = state.lock().unwrap();
            if let Some(error) = guard.failure.clone() {
                return Err(error);
            }
            Ok(operation(&mut guard))
        })
    }
}

impl CapacityStore for InMemoryAccessStore {
    fn try_reserve(&self, access_id: AccessId, quantity: u32) -> StoreFuture<'_, CounterUpdate> {
        self.run(move |state| {
            let Some(item) = state.item_mut(access_id) else {
                return CounterUpdate::Missing;
            };
            let previous = item.registered_count;
            let fits = item
                .max_capacity
                .is_none_or(|max| max.saturating_sub(previous) >= quantity);
            if fits {
                item.registered_count = previous + quantity;
                CounterUpdate::Applied { previous }
            } else {
                CounterUpdate::Rejected
            }
        })
    }

    fn try_join_waitlist(
        &self,
        access_id: AccessId,
        registration_id: RegistrationId,
        quantity: u32,
    ) -> StoreFuture<'_, WaitlistJoin> {
        self.run(move |state| {
            let Some(item) = state.item_mut(access_id) else {
                return WaitlistJoin::Missing;
            };
            if !item.waitlist_enabled {
                return WaitlistJoin::Disabled;
            }
            let previous = item.waitlist_count;
            let fits = item
                .max_waitlist
                .is_none_or(|max| max.saturating_sub(previous) >= quantity);
            if fits {
                item.waitlist_count = previous + quantity;
                state.enqueue(access_id, registration_id, quantity);
                WaitlistJoin::Joined { previous }
            } else {
                WaitlistJoin::Full
            }
        })
    }

    fn try_release(
        &self,
        access_id: AccessId,
        quantity: u32,
        holding: Holding,
    ) -> StoreFuture<'_, CounterUpdate> {
        self.run(move |state| match holding {
            Holding::Registered => {
                let Some(item) = state.item_mut(access_id) else {
                    return CounterUpdate::Missing;
                };
                let previous = item.registered_count;
                if previous >= quantity {
                    item.registered_count = previous - quantity;
                    CounterUpdate::Applied { previous }
                } else {
                    CounterUpdate::Rejected
                }
            }
            Holding::Waitlisted(registration_id) => {
                state.leave_waitlist(access_id, registration_id, quantity)
            }
        })
    }

    fn promote_next(&self, access_id: AccessId) -> StoreFuture<'_, PromotionOutcome> {
        self.run(move |state| {
            let head = state
                .waitlists
                .get(&access_id)
                .and_then(|queue| queue.first_key_value())
                .map(|(ticket, entry)| (*ticket, *entry));
            let Some(item) = state.item_mut(access_id) else {
                return PromotionOutcome::Missing;
            };
            let Some((ticket, (registration_id, quantity))) = head else {
                return PromotionOutcome::NoneWaiting;
            };
            let fits = item
                .max_capacity
                .is_none_or(|max| max.saturating_sub(item.registered_count) >= quantity);
            if !fits || item.waitlist_count < quantity {
                return PromotionOutcome::NoRoom;
            }

            item.waitlist_count -= quantity;
            item.registered_count += quantity;
            if let Some(queue) = state.waitlists.get_mut(&access_id) {
                queue.remove(&ticket);
            }
            PromotionOutcome::Promoted(WaitlistPromotion {
                registration_id,
                access_id,
                quantity,
                ticket,
            })
        })
    }
}

impl AccessCatalog for InMemoryAccessStore {
    fn load_event_items(&self, event_id: EventId) -> StoreFuture<'_, Vec<AccessItem>> {
        self.run(move |state| {
            state
                .items
                .iter()
                .filter(|item| item.event_id == event_id)
                .cloned()
                .collect()
        })
    }
}

// ============================================================================
// Sponsorships
// ============================================================================

#[derive(Debug, Default)]
struct SponsorshipState {
    sponsorships: HashMap<SponsorshipId, Sponsorship>,
    registrations: HashMap<RegistrationId, RegistrationSnapshot>,
    usages: Vec<SponsorshipUsage>,
    cancel_during_link: HashSet<SponsorshipId>,
    failure: Option<StoreError>,
    latency: Option<Duration>,
}

impl SponsorshipState {
    fn credit(&mut self, registration_id: RegistrationId) -> RegistrationCredit {
        let usages: Vec<SponsorshipUsage> = self
            .usages
            .iter()
            .filter(|usage| usage.registration_id == registration_id)
            .copied()
            .collect();
        let sponsorship_amount = calculate_total_sponsorship_amount(&usages);
        if let Some(registration) = self.registrations.get_mut(&registration_id) {
            registration.sponsorship_amount = sponsorship_amount;
        }
        RegistrationCredit {
            registration_id,
            sponsorship_amount,
        }
    }

    fn restatus(&mut self, sponsorship_id: SponsorshipId) -> SponsorshipStatus {
        let count = self
            .usages
            .iter()
            .filter(|usage| usage.sponsorship_id == sponsorship_id)
            .count();
        match self.sponsorships.get_mut(&sponsorship_id) {
            Some(sponsorship) => {
                sponsorship.status = determine_sponsorship_status(sponsorship.status, count);
                sponsorship.status
            }
            None => SponsorshipStatus::Pending,
        }
    }

    fn linked(&self, sponsorship_id: SponsorshipId, registration_id: RegistrationId) -> bool {
        self.usages.iter().any(|usage| {
            usage.sponsorship_id == sponsorship_id && usage.registration_id == registration_id
        })
    }
}

/// In-memory sponsorship store.
#[derive(Clone, Debug, Default)]
pub struct InMemorySponsorshipStore {
    state: Arc<Mutex<SponsorshipState>>,
}

impl InMemorySponsorshipStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a registration snapshot
    pub fn insert_registration(&self, registration: RegistrationSnapshot) {
        self.state
            .lock()
            .unwrap()
            .registrations
            .insert(registration.id, registration);
    }

    /// Insert or replace a sponsorship directly
    pub fn insert_sponsorship(&self, sponsorship: Sponsorship) {
        self.state
            .lock()
            .unwrap()
            .sponsorships
            .insert(sponsorship.id, sponsorship);
    }

    /// Current snapshot of a registration
    #[must_use]
    pub fn registration(&self, id: RegistrationId) -> Option<RegistrationSnapshot> {
        self.state.lock().unwrap().registrations.get(&id).cloned()
    }

    /// Current snapshot of a sponsorship
    #[must_use]
    pub fn sponsorship(&self, id: SponsorshipId) -> Option<Sponsorship> {
        self.state.lock().unwrap().sponsorships.get(&id).cloned()
    }

    /// Every usage on `registration_id`
    #[must_use]
    pub fn usages_for(&self, registration_id: RegistrationId) -> Vec<SponsorshipUsage> {
        self.state
            .lock()
            .unwrap()
            .usages
            .iter()
            .filter(|usage| usage.registration_id == registration_id)
            .copied()
            .collect()
    }

    /// Number of stored sponsorships
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().sponsorships.len()
    }

    /// Whether no sponsorship is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate a concurrent cancel landing between the ledger's checks and the link commit
    pub fn cancel_during_next_link(&self, sponsorship_id: SponsorshipId) {
        self.state
            .lock()
            .unwrap()
            .cancel_during_link
            .insert(sponsorship_id);
    }

    /// Make every subsequent operation fail with `error` (`None` to recover)
    pub fn fail_with(&self, error: Option<StoreError>) {
        self.state.lock().unwrap().failure = error;
    }

    /// Delay every subsequent operation by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().unwrap().latency = latency;
    }

    fn run<T, F>(&self, operation: F) -> StoreFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SponsorshipState) -> T + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let latency = state.lock().unwrap().latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let mut guard = state.lock().unwrap();
            if let Some(error) = guard.failure.clone() {
                return Err(error);
            }
            Ok(operation(&mut guard))
        })
    }
}

impl SponsorshipStore for InMemorySponsorshipStore {
    fn code_exists<'a>(&'a self, code: &'a str) -> StoreFuture<'a, bool> {
        let code = code.to_string();
        self.run(move |state| state.sponsorships.values().any(|s| s.code == code))
    }

    fn insert_sponsorships(&self, sponsorships: Vec<Sponsorship>) -> StoreFuture<'_, ()> {
        let inserted = self.run(move |state| {
            let taken: HashSet<String> =
                state.sponsorships.values().map(|s| s.code.clone()).collect();
            if let Some(duplicate) = sponsorships.iter().find(|s| taken.contains(&s.code)) {
                return Err(StoreError::Database(format!(
                    "duplicate sponsorship code {}",
                    duplicate.code
                )));
            }
            for sponsorship in sponsorships {
                state.sponsorships.insert(sponsorship.id, sponsorship);
            }
            Ok(())
        });
        Box::pin(async move { inserted.await? })
    }

    fn load_sponsorship(&self, id: SponsorshipId) -> StoreFuture<'_, Option<Sponsorship>> {
        self.run(move |state| state.sponsorships.get(&id).cloned())
    }

    fn load_registration(
        &self,
        id: RegistrationId,
    ) -> StoreFuture<'_, Option<RegistrationSnapshot>> {
        self.run(move |state| state.registrations.get(&id).cloned())
    }

    fn load_linked_sponsorships(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Vec<Sponsorship>> {
        self.run(move |state| {
            let ids: BTreeSet<SponsorshipId> = state
                .usages
                .iter()
                .filter(|usage| usage.registration_id == registration_id)
                .map(|usage| usage.sponsorship_id)
                .collect();
            ids.iter()
                .filter_map(|id| state.sponsorships.get(id).cloned())
                .collect()
        })
    }

    fn commit_link(&self, usage: SponsorshipUsage) -> StoreFuture<'_, LinkCommit> {
        self.run(move |state| {
            if state.cancel_during_link.remove(&usage.sponsorship_id) {
                if let Some(sponsorship) = state.sponsorships.get_mut(&usage.sponsorship_id) {
                    sponsorship.status = SponsorshipStatus::Cancelled;
                }
            }

            let Some(sponsorship) = state.sponsorships.get(&usage.sponsorship_id) else {
                return LinkCommit::Missing;
            };
            if sponsorship.status == SponsorshipStatus::Cancelled {
                return LinkCommit::Cancelled;
            }
            if !state.registrations.contains_key(&usage.registration_id) {
                return LinkCommit::Missing;
            }
            if state.linked(usage.sponsorship_id, usage.registration_id) {
                return LinkCommit::AlreadyLinked;
            }

            state.usages.push(usage);
            LinkCommit::Linked {
                credit: state.credit(usage.registration_id),
                status: state.restatus(usage.sponsorship_id),
            }
        })
    }

    fn commit_unlink(
        &self,
        sponsorship_id: SponsorshipId,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, UnlinkCommit> {
        self.run(move |state| {
            let Some(index) = state.usages.iter().position(|usage| {
                usage.sponsorship_id == sponsorship_id && usage.registration_id == registration_id
            }) else {
                return UnlinkCommit::NotLinked;
            };
            let removed = state.usages.remove(index);
            UnlinkCommit::Unlinked {
                amount_removed: removed.amount_applied,
                credit: state.credit(registration_id),
                status: state.restatus(sponsorship_id),
            }
        })
    }

    fn commit_cancel(&self, sponsorship_id: SponsorshipId) -> StoreFuture<'_, CancelCommit> {
        self.run(move |state| {
            let Some(sponsorship) = state.sponsorships.get_mut(&sponsorship_id) else {
                return CancelCommit::Missing;
            };
            if sponsorship.status == SponsorshipStatus::Cancelled {
                return CancelCommit::AlreadyCancelled;
            }
            sponsorship.status = SponsorshipStatus::Cancelled;

            let affected: BTreeSet<RegistrationId> = state
                .usages
                .iter()
                .filter(|usage| usage.sponsorship_id == sponsorship_id)
                .map(|usage| usage.registration_id)
                .collect();
            state
                .usages
                .retain(|usage| usage.sponsorship_id != sponsorship_id);
            CancelCommit::Cancelled {
                affected: affected.into_iter().map(|id| state.credit(id)).collect(),
            }
        })
    }

    fn commit_coverage(
        &self,
        sponsorship_id: SponsorshipId,
        covers_base_price: bool,
        covered_access_ids: BTreeSet<AccessId>,
        total_amount: Money,
    ) -> StoreFuture<'_, CoverageCommit> {
        self.run(move |state| {
            let Some(sponsorship) = state.sponsorships.get_mut(&sponsorship_id) else {
                return CoverageCommit::Missing;
            };
            if sponsorship.status == SponsorshipStatus::Cancelled {
                return CoverageCommit::Cancelled;
            }
            sponsorship.covers_base_price = covers_base_price;
            sponsorship.covered_access_ids = covered_access_ids;
            sponsorship.total_amount = total_amount;

            let mut shrunk = BTreeSet::new();
            for usage in &mut state.usages {
                if usage.sponsorship_id == sponsorship_id && usage.amount_applied > total_amount {
                    usage.amount_applied = total_amount;
                    shrunk.insert(usage.registration_id);
                }
            }
            CoverageCommit::Updated {
                recapped: shrunk.into_iter().map(|id| state.credit(id)).collect(),
            }
        })
    }
}
