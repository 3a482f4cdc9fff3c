//! # Event Access Core
//!
//! Access allocation and sponsorship coverage for event registrations.
//!
//! Organizers configure optional **access items** (workshops, dinners, sessions,
//! accommodation, transport) with schedules, capacities, eligibility rules and prerequisites.
//! Registrants pick a consistent subset. Sponsors pre-pay coverage that is reconciled against
//! what a registrant was actually charged.
//!
//! ## Components
//!
//! - [`condition`]: eligibility rules evaluated against form answers
//! - [`availability`]: which items a registrant sees right now
//! - [`prerequisites`]: prerequisite graph edits, rejecting cycles
//! - [`time_slots`]: date and start-time grouping with mutual-exclusion semantics
//! - [`capacity`]: atomic reserve, release and waitlist promotion through a [`CapacityStore`]
//! - [`selection`]: accumulate every problem with a selection before checkout
//! - [`sponsorship`]: codes, totals, applicable amount, overlap warnings
//! - [`ledger`]: sponsorship create, link, unlink, cancel and coverage edits
//! - [`catalog`]: organizer-side item guards
//!
//! ## Architecture Principles
//!
//! - Pure computation in the core, storage behind collaborator traits
//! - Counters change only through single conditional updates in the store
//! - Validation is advisory; reservation is the source of truth
//! - Dependency injection via `Arc<dyn Trait>` ([`Clock`], stores)
//!
//! ## Example
//!
//! ```
//! use event_access_core::time_slots::{group, SelectionType};
//! use event_access_core::types::{AccessItem, AccessType, EventId, Money};
//! use chrono::{TimeZone, Utc};
//!
//! let event = EventId::new();
//! let start = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).single();
//! let mut a = AccessItem::new(event, AccessType::Workshop, "A", Money::ZERO, "EUR");
//! let mut b = AccessItem::new(event, AccessType::Workshop, "B", Money::ZERO, "EUR");
//! a.starts_at = start;
//! b.starts_at = start;
//!
//! let grouped = group(vec![a, b]);
//! assert_eq!(grouped.date_groups[0].slots[0].selection_type, SelectionType::Single);
//! ```

pub mod availability;
pub mod capacity;
pub mod catalog;
pub mod condition;
pub mod config;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod prerequisites;
pub mod selection;
pub mod sponsorship;
pub mod time_slots;
pub mod types;

pub use capacity::{CapacityReservation, CapacityStore, ReservationResult, ReservationStatus};
pub use catalog::AccessCatalog;
pub use config::EngineConfig;
pub use environment::{Clock, SystemClock};
pub use error::{AccessError, ErrorCode, ErrorKind, Result, StoreError};
pub use ledger::{SponsorshipLedger, SponsorshipStore};
pub use selection::{SelectionValidator, ValidationResult};
pub use sponsorship::CoverageResult;
pub use types::{
    AccessId, AccessItem, AccessType, EventId, Money, RegistrationId, RegistrationSnapshot,
    Selection, Sponsorship, SponsorshipId, SponsorshipStatus, SponsorshipUsage,
};
