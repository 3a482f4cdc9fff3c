//! # Event Access Testing
//!
//! Testing utilities and helpers for the event access engine.
//!
//! This crate provides:
//! - Mock implementations of injected traits ([`FixedClock`])
//! - In-memory [`CapacityStore`](event_access_core::CapacityStore),
//!   [`AccessCatalog`](event_access_core::AccessCatalog) and
//!   [`SponsorshipStore`](event_access_core::SponsorshipStore) implementations
//! - Builders for access items and registrations
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use event_access_core::CapacityReservation;
//! use event_access_testing::{AccessItemBuilder, InMemoryAccessStore};
//! use event_access_core::types::{EventId, RegistrationId};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let item = AccessItemBuilder::new(EventId::new(), "Workshop").capacity(1).build();
//! let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
//! let reservation = CapacityReservation::with_timeout(store, Duration::from_secs(1));
//!
//! assert!(reservation.reserve(item.id, RegistrationId::new(), 1, false).await.is_ok());
//! assert!(reservation.reserve(item.id, RegistrationId::new(), 1, false).await.is_err());
//! # });
//! ```

mod stores;

pub use stores::{InMemoryAccessStore, InMemorySponsorshipStore};

/// Mock implementations of injected traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use event_access_core::environment::Clock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making availability windows reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use event_access_testing::mocks::FixedClock;
    /// use event_access_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Builders and setup helpers.
pub mod helpers {
    use chrono::{DateTime, Utc};
    use event_access_core::condition::{Condition, ConditionLogic};
    use event_access_core::types::{
        AccessCharge, AccessId, AccessItem, AccessType, EventId, Money, PriceBreakdown,
        RegistrationId, RegistrationSnapshot,
    };
    use std::collections::BTreeSet;

    /// Install a `tracing` subscriber honouring `RUST_LOG`, once per test binary.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Fluent builder for [`AccessItem`].
    #[derive(Clone, Debug)]
    pub struct AccessItemBuilder {
        item: AccessItem,
    }

    impl AccessItemBuilder {
        /// Active workshop priced at zero with unlimited capacity
        #[must_use]
        pub fn new(event_id: EventId, name: &str) -> Self {
            Self {
                item: AccessItem::new(event_id, AccessType::Workshop, name, Money::ZERO, "EUR"),
            }
        }

        /// Set the id
        #[must_use]
        pub const fn id(mut self, id: AccessId) -> Self {
            self.item.id = id;
            self
        }

        /// Set the item kind
        #[must_use]
        pub const fn access_type(mut self, access_type: AccessType) -> Self {
            self.item.access_type = access_type;
            self
        }

        /// Set the unit price in minor units
        #[must_use]
        pub const fn price(mut self, cents: u64) -> Self {
            self.item.price = Money::from_cents(cents);
            self
        }

        /// Schedule the item
        #[must_use]
        pub const fn scheduled(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
            self.item.starts_at = Some(starts_at);
            self.item.ends_at = Some(ends_at);
            self
        }

        /// Set the start only
        #[must_use]
        pub const fn starts_at(mut self, starts_at: DateTime<Utc>) -> Self {
            self.item.starts_at = Some(starts_at);
            self
        }

        /// Limit confirmed capacity
        #[must_use]
        pub const fn capacity(mut self, max: u32) -> Self {
            self.item.max_capacity = Some(max);
            self
        }

        /// Set the confirmed count
        #[must_use]
        pub const fn registered(mut self, count: u32) -> Self {
            self.item.registered_count = count;
            self
        }

        /// Enable the waitlist with an optional cap
        #[must_use]
        pub const fn waitlist(mut self, max: Option<u32>) -> Self {
            self.item.waitlist_enabled = true;
            self.item.max_waitlist = max;
            self
        }

        /// Set the waitlisted count
        #[must_use]
        pub const fn waitlisted(mut self, count: u32) -> Self {
            self.item.waitlist_count = count;
            self
        }

        /// Set the selection window
        #[must_use]
        pub const fn available(
            mut self,
            from: Option<DateTime<Utc>>,
            to: Option<DateTime<Utc>>,
        ) -> Self {
            self.item.available_from = from;
            self.item.available_to = to;
            self
        }

        /// Add an eligibility condition
        #[must_use]
        pub fn condition(mut self, condition: Condition) -> Self {
            self.item.conditions.push(condition);
            self
        }

        /// Set how conditions combine
        #[must_use]
        pub const fn logic(mut self, logic: ConditionLogic) -> Self {
            self.item.condition_logic = logic;
            self
        }

        /// Require another item
        #[must_use]
        pub fn requires(mut self, id: AccessId) -> Self {
            self.item.required_access_ids.insert(id);
            self
        }

        /// Deactivate the item
        #[must_use]
        pub const fn inactive(mut self) -> Self {
            self.item.active = false;
            self
        }

        /// Finish building
        #[must_use]
        pub fn build(self) -> AccessItem {
            self.item
        }
    }

    /// A registration for `event_id` whose breakdown charges `base` plus each `(item, subtotal)`.
    #[must_use]
    pub fn registration_with_breakdown(
        event_id: EventId,
        base: u64,
        charges: &[(AccessId, u64)],
    ) -> RegistrationSnapshot {
        let access_items: Vec<AccessCharge> = charges
            .iter()
            .map(|(access_id, subtotal)| AccessCharge {
                access_id: *access_id,
                subtotal: Money::from_cents(*subtotal),
            })
            .collect();
        let total: Money = Money::from_cents(base)
            .saturating_add(access_items.iter().map(|charge| charge.subtotal).sum());

        RegistrationSnapshot {
            id: RegistrationId::new(),
            event_id,
            total_amount: total,
            base_amount: Money::from_cents(base),
            access_type_ids: charges.iter().map(|(id, _)| *id).collect::<BTreeSet<_>>(),
            price_breakdown: Some(PriceBreakdown {
                calculated_base_price: Money::from_cents(base),
                access_items,
            }),
            sponsorship_amount: Money::ZERO,
        }
    }
}

/// Property-based testing strategies.
pub mod properties {
    use event_access_core::types::{
        AccessCharge, AccessId, AccessItem, AccessType, EventId, Money, PriceBreakdown,
        RegistrationId, RegistrationSnapshot, Sponsorship, SponsorshipId, SponsorshipStatus,
    };
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    /// Deterministic id for index `n`, stable across cases
    #[must_use]
    pub fn access_id(n: usize) -> AccessId {
        AccessId::from_uuid(Uuid::from_u128(n as u128 + 1))
    }

    /// Amounts up to 10 000.00
    pub fn money() -> impl Strategy<Value = Money> {
        (0u64..=1_000_000).prop_map(Money::from_cents)
    }

    /// Any sponsorship status
    pub fn sponsorship_status() -> impl Strategy<Value = SponsorshipStatus> {
        prop_oneof![
            Just(SponsorshipStatus::Pending),
            Just(SponsorshipStatus::Used),
            Just(SponsorshipStatus::Cancelled),
        ]
    }

    /// A sponsorship covering a subset of a pool of `pool` item ids
    pub fn sponsorship(pool: usize) -> impl Strategy<Value = Sponsorship> {
        (
            any::<bool>(),
            proptest::collection::btree_set(0..pool, 0..=pool),
            money(),
            sponsorship_status(),
        )
            .prop_map(|(covers_base_price, covered, total_amount, status)| Sponsorship {
                id: SponsorshipId::new(),
                event_id: EventId::from_uuid(Uuid::nil()),
                code: "SP-TEST".to_string(),
                covers_base_price,
                covered_access_ids: covered.into_iter().map(access_id).collect(),
                total_amount,
                status,
            })
    }

    /// A registration over the same pool, with or without a breakdown
    pub fn registration(pool: usize) -> impl Strategy<Value = RegistrationSnapshot> {
        (
            money(),
            money(),
            proptest::collection::btree_map(0..pool, money(), 0..=pool),
            proptest::option::of(money()),
        )
            .prop_map(|(total_amount, base_amount, charges, breakdown_base)| {
                let access_type_ids: BTreeSet<AccessId> =
                    charges.keys().copied().map(access_id).collect();
                let price_breakdown = breakdown_base.map(|calculated_base_price| PriceBreakdown {
                    calculated_base_price,
                    access_items: charges
                        .iter()
                        .map(|(n, subtotal)| AccessCharge {
                            access_id: access_id(*n),
                            subtotal: *subtotal,
                        })
                        .collect(),
                });
                RegistrationSnapshot {
                    id: RegistrationId::new(),
                    event_id: EventId::from_uuid(Uuid::nil()),
                    total_amount,
                    base_amount,
                    access_type_ids,
                    price_breakdown,
                    sponsorship_amount: Money::ZERO,
                }
            })
    }

    /// `size` items whose prerequisite edges only point from lower to higher index, so the
    /// graph is acyclic by construction.
    pub fn acyclic_items(size: usize) -> impl Strategy<Value = Vec<AccessItem>> {
        proptest::collection::vec(any::<bool>(), size * size).prop_map(move |edges| {
            let event_id = EventId::from_uuid(Uuid::nil());
            (0..size)
                .map(|i| {
                    let mut item = AccessItem::new(
                        event_id,
                        AccessType::Session,
                        format!("Item {i}"),
                        Money::ZERO,
                        "EUR",
                    );
                    item.id = access_id(i);
                    item.required_access_ids = (i + 1..size)
                        .filter(|j| edges[i * size + j])
                        .map(access_id)
                        .collect();
                    item
                })
                .collect()
        })
    }
}

// Re-export commonly used items
pub use helpers::{AccessItemBuilder, init_test_tracing, registration_with_breakdown};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use event_access_core::environment::Clock;

    #[test]
    fn test_clock_is_new_year_2025() {
        let now = test_clock().now();
        assert_eq!((now.year(), now.month(), now.day()), (2025, 1, 1));
        assert_eq!(now, test_clock().now());
    }

    #[test]
    fn breakdown_registration_totals_charges() {
        let dinner = properties::access_id(0);
        let registration =
            registration_with_breakdown(event_access_core::EventId::new(), 10_000, &[(dinner, 2_500)]);
        assert_eq!(registration.total_amount.cents(), 12_500);
        assert!(registration.access_type_ids.contains(&dinner));
    }
}
