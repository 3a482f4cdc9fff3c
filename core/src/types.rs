//! Domain types for the access allocation engine.
//!
//! Value objects (identifiers, money), the organizer-defined [`AccessItem`], the
//! registrant-supplied [`Selection`], and the sponsorship records reconciled against a
//! [`RegistrationSnapshot`].

use crate::condition::{Condition, ConditionLogic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for an event
    EventId
}

uuid_id! {
    /// Unique identifier for an access item
    AccessId
}

uuid_id! {
    /// Unique identifier for a sponsorship
    SponsorshipId
}

uuid_id! {
    /// Unique identifier for a registration
    RegistrationId
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Represents money in minor units (cents) to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Adds two money amounts, clamping at `u64::MAX`
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtracts two money amounts, clamping at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiplies money by a quantity, clamping at `u64::MAX`
    #[must_use]
    pub fn saturating_mul(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(u64::from(quantity)))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Access Items
// ============================================================================

/// Kind of access item offered by an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    /// Hands-on workshop
    Workshop,
    /// Dinner or meal
    Dinner,
    /// Conference session
    Session,
    /// Networking event
    Networking,
    /// Accommodation (hotel, dorm)
    Accommodation,
    /// Transport (shuttle, bus)
    Transport,
    /// Anything else
    Other,
}

impl AccessType {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workshop => "WORKSHOP",
            Self::Dinner => "DINNER",
            Self::Session => "SESSION",
            Self::Networking => "NETWORKING",
            Self::Accommodation => "ACCOMMODATION",
            Self::Transport => "TRANSPORT",
            Self::Other => "OTHER",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WORKSHOP" => Some(Self::Workshop),
            "DINNER" => Some(Self::Dinner),
            "SESSION" => Some(Self::Session),
            "NETWORKING" => Some(Self::Networking),
            "ACCOMMODATION" => Some(Self::Accommodation),
            "TRANSPORT" => Some(Self::Transport),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

/// An optional, separately priced event component.
///
/// `registered_count` and `waitlist_count` are snapshots of the authoritative counters held
/// by the [`CapacityStore`](crate::capacity::CapacityStore). They are read here for display
/// and advisory validation only; mutation goes through
/// [`CapacityReservation`](crate::capacity::CapacityReservation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessItem {
    /// Item identifier
    pub id: AccessId,
    /// Owning event
    pub event_id: EventId,
    /// Item kind
    #[serde(rename = "type")]
    pub access_type: AccessType,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// ISO currency code
    pub currency: String,
    /// When the item takes place
    pub starts_at: Option<DateTime<Utc>>,
    /// When the item ends
    pub ends_at: Option<DateTime<Utc>>,
    /// Hard cap on confirmed selections (None = unlimited)
    pub max_capacity: Option<u32>,
    /// Confirmed selections
    pub registered_count: u32,
    /// Whether a waitlist opens once capacity is exhausted
    pub waitlist_enabled: bool,
    /// Cap on the waitlist (None = unlimited)
    pub max_waitlist: Option<u32>,
    /// Waitlisted selections
    pub waitlist_count: u32,
    /// Selection opens at
    pub available_from: Option<DateTime<Utc>>,
    /// Selection closes at
    pub available_to: Option<DateTime<Utc>>,
    /// Eligibility rules, evaluated against form answers
    pub conditions: Vec<Condition>,
    /// How `conditions` combine
    pub condition_logic: ConditionLogic,
    /// Items that must be selected alongside this one
    pub required_access_ids: BTreeSet<AccessId>,
    /// Whether the item is offered at all
    pub active: bool,
}

impl AccessItem {
    /// Creates an active, unscheduled item with unlimited capacity and no rules.
    #[must_use]
    pub fn new(
        event_id: EventId,
        access_type: AccessType,
        name: impl Into<String>,
        price: Money,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: AccessId::new(),
            event_id,
            access_type,
            name: name.into(),
            price,
            currency: currency.into(),
            starts_at: None,
            ends_at: None,
            max_capacity: None,
            registered_count: 0,
            waitlist_enabled: false,
            max_waitlist: None,
            waitlist_count: 0,
            available_from: None,
            available_to: None,
            conditions: Vec::new(),
            condition_logic: ConditionLogic::default(),
            required_access_ids: BTreeSet::new(),
            active: true,
        }
    }

    /// Remaining confirmed spots, or `None` when capacity is unlimited.
    #[must_use]
    pub fn spots_remaining(&self) -> Option<u32> {
        self.max_capacity
            .map(|max| max.saturating_sub(self.registered_count))
    }

    /// Whether capacity is limited and exhausted.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.spots_remaining().is_some_and(|spots| spots == 0)
    }

    /// Remaining waitlist room, or `None` when the waitlist is unlimited.
    #[must_use]
    pub fn waitlist_room(&self) -> Option<u32> {
        self.max_waitlist
            .map(|max| max.saturating_sub(self.waitlist_count))
    }

    /// Whether a registrant could join the waitlist right now.
    #[must_use]
    pub fn can_join_waitlist(&self) -> bool {
        self.is_full()
            && self.waitlist_enabled
            && self.waitlist_room().is_none_or(|room| room > 0)
    }
}

/// One chosen access item within a registration's selection set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Selected item
    pub access_id: AccessId,
    /// Requested quantity
    pub quantity: u32,
}

impl Selection {
    /// Creates a selection
    #[must_use]
    pub const fn new(access_id: AccessId, quantity: u32) -> Self {
        Self {
            access_id,
            quantity,
        }
    }
}

/// The event's own schedule, bounding every item's `starts_at`/`ends_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWindow {
    /// Event start
    pub starts_at: DateTime<Utc>,
    /// Event end
    pub ends_at: DateTime<Utc>,
}

impl EventWindow {
    /// Whether `instant` falls inside the window (inclusive).
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.starts_at && instant <= self.ends_at
    }
}

// ============================================================================
// Sponsorships
// ============================================================================

/// Lifecycle state of a sponsorship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SponsorshipStatus {
    /// Not linked to any registration
    Pending,
    /// Linked to at least one registration
    Used,
    /// Withdrawn by the sponsor (sticky)
    Cancelled,
}

impl SponsorshipStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Used => "USED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "USED" => Some(Self::Used),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SponsorshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre-paid coverage grant issued by a third party.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sponsorship {
    /// Sponsorship identifier
    pub id: SponsorshipId,
    /// Event the sponsorship belongs to
    pub event_id: EventId,
    /// Redeemable code (`SP-XXXX`)
    pub code: String,
    /// Whether the registration base fee is covered
    pub covers_base_price: bool,
    /// Access items covered
    pub covered_access_ids: BTreeSet<AccessId>,
    /// Sum of covered components, frozen at creation and on coverage edits
    pub total_amount: Money,
    /// Current status
    pub status: SponsorshipStatus,
}

/// Record of a sponsorship being applied to one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipUsage {
    /// Applied sponsorship
    pub sponsorship_id: SponsorshipId,
    /// Receiving registration
    pub registration_id: RegistrationId,
    /// Amount credited to the registration
    pub amount_applied: Money,
}

/// Charged subtotal for one access item of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCharge {
    /// Charged item
    pub access_id: AccessId,
    /// Quantity × unit price at checkout
    pub subtotal: Money,
}

/// Price breakdown cached on a registration at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    /// Base fee after pricing rules
    pub calculated_base_price: Money,
    /// Per-item charges
    pub access_items: Vec<AccessCharge>,
}

/// The parts of a registration that sponsorship coverage is computed against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSnapshot {
    /// Registration identifier
    pub id: RegistrationId,
    /// Event the registration belongs to
    pub event_id: EventId,
    /// Total charged
    pub total_amount: Money,
    /// Stored base fee
    pub base_amount: Money,
    /// Selected access items
    pub access_type_ids: BTreeSet<AccessId>,
    /// Cached price breakdown, when checkout produced one
    pub price_breakdown: Option<PriceBreakdown>,
    /// Denormalized sum of applied sponsorship usages
    pub sponsorship_amount: Money,
}

impl RegistrationSnapshot {
    /// Amount still due after sponsorship credit.
    #[must_use]
    pub const fn amount_due(&self) -> Money {
        self.total_amount.saturating_sub(self.sponsorship_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> AccessItem {
        AccessItem {
            id: AccessId::new(),
            event_id: EventId::new(),
            access_type: AccessType::Workshop,
            name: "Intro".to_string(),
            price: Money::from_cents(5_000),
            currency: "EUR".to_string(),
            starts_at: None,
            ends_at: None,
            max_capacity: Some(10),
            registered_count: 10,
            waitlist_enabled: true,
            max_waitlist: Some(2),
            waitlist_count: 1,
            available_from: None,
            available_to: None,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            required_access_ids: BTreeSet::new(),
            active: true,
        }
    }

    #[test]
    fn full_item_with_waitlist_room_can_join() {
        let item = item();
        assert_eq!(item.spots_remaining(), Some(0));
        assert!(item.is_full());
        assert!(item.can_join_waitlist());
    }

    #[test]
    fn waitlist_at_cap_cannot_join() {
        let mut item = item();
        item.waitlist_count = 2;
        assert!(!item.can_join_waitlist());
    }

    #[test]
    fn unlimited_capacity_is_never_full() {
        let mut item = item();
        item.max_capacity = None;
        assert_eq!(item.spots_remaining(), None);
        assert!(!item.is_full());
        assert!(!item.can_join_waitlist());
    }

    #[test]
    fn money_sum_and_display() {
        let total: Money = [Money::from_cents(150), Money::from_cents(1_000)]
            .into_iter()
            .sum();
        assert_eq!(total, Money::from_cents(1_150));
        assert_eq!(total.to_string(), "11.50");
    }

    #[test]
    fn access_type_round_trips_through_db_string() {
        assert_eq!(AccessType::parse(AccessType::Dinner.as_str()), Some(AccessType::Dinner));
        assert_eq!(AccessType::parse("BANQUET"), None);
    }
}
