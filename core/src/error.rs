//! Error types for the access engine.
//!
//! [`AccessError`] is the domain error every fallible operation returns. Each variant maps
//! to a stable [`ErrorCode`] for the surrounding service layer and to an [`ErrorKind`]
//! describing how a caller should react. [`StoreError`] is what storage collaborators
//! report; it is wrapped, never interpreted as a capacity outcome.

use crate::types::{AccessId, RegistrationId, SponsorshipId, SponsorshipStatus};
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Stable, wire-level error codes surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Referenced access item absent
    AccessNotFound,
    /// Item schedule outside the event window
    AccessDateOutOfBounds,
    /// Prerequisite edge would create a cycle
    AccessCircularDependency,
    /// Item still has registrations or waitlist entries
    AccessHasRegistrations,
    /// No confirmed capacity left
    AccessCapacityExceeded,
    /// No waitlist room left
    AccessWaitlistFull,
    /// Sponsorship covers nothing the registration is charged for
    SponsorshipNotApplicable,
    /// Sponsorship status forbids the operation
    SponsorshipStatusConflict,
    /// Generic conflict (duplicate link, exhausted code space)
    Conflict,
    /// Malformed request
    BadRequest,
    /// Referenced sponsorship or registration absent
    NotFound,
    /// Storage failed or timed out; retryable
    StoreUnavailable,
}

impl ErrorCode {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessNotFound => "ACCESS_NOT_FOUND",
            Self::AccessDateOutOfBounds => "ACCESS_DATE_OUT_OF_BOUNDS",
            Self::AccessCircularDependency => "ACCESS_CIRCULAR_DEPENDENCY",
            Self::AccessHasRegistrations => "ACCESS_HAS_REGISTRATIONS",
            Self::AccessCapacityExceeded => "ACCESS_CAPACITY_EXCEEDED",
            Self::AccessWaitlistFull => "ACCESS_WAITLIST_FULL",
            Self::SponsorshipNotApplicable => "SPONSORSHIP_NOT_APPLICABLE",
            Self::SponsorshipStatusConflict => "SPONSORSHIP_STATUS_CONFLICT",
            Self::Conflict => "CONFLICT",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a caller should treat an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input rejected; show to the user
    Validation,
    /// Referenced entity absent; terminal for the operation
    NotFound,
    /// State forbids the operation (capacity, cycle, status race)
    Conflict,
    /// Storage failure; the outcome is unknown and may be retried
    Transient,
}

/// Errors reported by storage collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// The storage call did not complete within the configured timeout.
    #[error("Storage operation timed out")]
    Timeout,

    /// Stored data could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No connection could be obtained (pool exhausted or closed).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Domain error for every engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessError {
    /// An access item id did not resolve within the event.
    #[error("Access item not found: {0}")]
    AccessNotFound(AccessId),

    /// Item schedule falls outside the event's dates.
    #[error("Access item '{name}' is scheduled outside the event dates")]
    DateOutOfBounds {
        /// Item name
        name: String,
    },

    /// Applying prerequisite edges would create a cycle.
    #[error("Circular prerequisite dependency: {}", format_path(.path))]
    CircularDependency {
        /// Node sequence of the detected cycle (first == last)
        path: Vec<AccessId>,
    },

    /// Item still has confirmed or waitlisted selections.
    #[error("Access item {access_id} has {registered} registrations and {waitlisted} waitlisted")]
    HasRegistrations {
        /// Item
        access_id: AccessId,
        /// Confirmed count
        registered: u32,
        /// Waitlisted count
        waitlisted: u32,
    },

    /// Not enough confirmed capacity.
    #[error("Access item {access_id} has insufficient capacity for {requested}")]
    CapacityExceeded {
        /// Item
        access_id: AccessId,
        /// Requested quantity
        requested: u32,
    },

    /// Not enough waitlist room.
    #[error("Waitlist for access item {access_id} is full")]
    WaitlistFull {
        /// Item
        access_id: AccessId,
        /// Requested quantity
        requested: u32,
    },

    /// Sponsorship does not cover anything charged to the registration.
    #[error("Sponsorship {code} does not apply to registration {registration_id}")]
    SponsorshipNotApplicable {
        /// Sponsorship code
        code: String,
        /// Registration
        registration_id: RegistrationId,
    },

    /// Sponsorship status forbids the operation.
    #[error("Sponsorship {sponsorship_id} is {status}")]
    SponsorshipStatusConflict {
        /// Sponsorship
        sponsorship_id: SponsorshipId,
        /// Status found
        status: SponsorshipStatus,
    },

    /// Referenced sponsorship absent.
    #[error("Sponsorship not found: {0}")]
    SponsorshipNotFound(SponsorshipId),

    /// Referenced registration absent.
    #[error("Registration not found: {0}")]
    RegistrationNotFound(RegistrationId),

    /// Referenced sponsorship usage absent.
    #[error("Sponsorship {sponsorship_id} is not linked to registration {registration_id}")]
    UsageNotFound {
        /// Sponsorship
        sponsorship_id: SponsorshipId,
        /// Registration
        registration_id: RegistrationId,
    },

    /// Generic conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Storage collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccessError {
    /// Wire-level error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AccessNotFound(_) => ErrorCode::AccessNotFound,
            Self::DateOutOfBounds { .. } => ErrorCode::AccessDateOutOfBounds,
            Self::CircularDependency { .. } => ErrorCode::AccessCircularDependency,
            Self::HasRegistrations { .. } => ErrorCode::AccessHasRegistrations,
            Self::CapacityExceeded { .. } => ErrorCode::AccessCapacityExceeded,
            Self::WaitlistFull { .. } => ErrorCode::AccessWaitlistFull,
            Self::SponsorshipNotApplicable { .. } => ErrorCode::SponsorshipNotApplicable,
            Self::SponsorshipStatusConflict { .. } => ErrorCode::SponsorshipStatusConflict,
            Self::SponsorshipNotFound(_)
            | Self::RegistrationNotFound(_)
            | Self::UsageNotFound { .. } => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::Store(_) => ErrorCode::StoreUnavailable,
        }
    }

    /// Taxonomy bucket.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DateOutOfBounds { .. } | Self::BadRequest(_) => ErrorKind::Validation,
            Self::AccessNotFound(_)
            | Self::SponsorshipNotFound(_)
            | Self::RegistrationNotFound(_)
            | Self::UsageNotFound { .. } => ErrorKind::NotFound,
            Self::CircularDependency { .. }
            | Self::HasRegistrations { .. }
            | Self::CapacityExceeded { .. }
            | Self::WaitlistFull { .. }
            | Self::SponsorshipNotApplicable { .. }
            | Self::SponsorshipStatusConflict { .. }
            | Self::Conflict(_) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Transient,
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

fn format_path(path: &[AccessId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
