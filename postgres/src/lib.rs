//! `PostgreSQL` stores for the event access engine.
//!
//! This crate implements the storage collaborators from `event-access-core` on top of sqlx:
//!
//! - [`PostgresCapacityStore`]: capacity and waitlist counters as single conditional
//!   `UPDATE ... RETURNING` statements; waitlist joins queue in the same statement, and
//!   promotion and waitlisted releases run as one locking transaction
//! - [`PostgresSponsorshipStore`]: sponsorships, usages and registration credits, each
//!   commit in one transaction that locks the sponsorship row first
//! - [`PostgresAccessCatalog`]: loads an event's access items
//!
//! # Example
//!
//! ```no_run
//! use event_access_core::{CapacityReservation, EngineConfig};
//! use event_access_postgres::{PostgresCapacityStore, connect, schema};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env();
//! let pool = connect(&config.postgres).await?;
//! schema::run_migrations(&pool).await?;
//!
//! let reservation = CapacityReservation::new(
//!     Arc::new(PostgresCapacityStore::new(pool)),
//!     &config,
//! );
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod capacity;
mod catalog;
pub mod schema;
mod sponsorship;

pub use capacity::PostgresCapacityStore;
pub use catalog::PostgresAccessCatalog;
pub use sponsorship::PostgresSponsorshipStore;

use event_access_core::config::PostgresConfig;
use event_access_core::error::StoreError;
use event_access_core::types::Money;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Open a connection pool sized by `config`.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if no connection can be established.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect(&config.url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connected to PostgreSQL"
    );

    Ok(pool)
}

/// Map a driver error onto the store error taxonomy.
pub(crate) fn database_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(error.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

pub(crate) fn to_count(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("Counter out of range: {value}")))
}

pub(crate) fn to_ticket(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("Negative queue ticket: {value}")))
}

pub(crate) fn to_usize(value: i64) -> Result<usize, StoreError> {
    usize::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("Row count out of range: {value}")))
}

pub(crate) fn to_money(value: i64) -> Result<Money, StoreError> {
    u64::try_from(value)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Serialization(format!("Negative amount: {value}")))
}

pub(crate) fn from_money(money: Money) -> Result<i64, StoreError> {
    i64::try_from(money.cents())
        .map_err(|_| StoreError::Serialization(format!("Amount out of range: {money}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_unavailable() {
        assert!(matches!(
            database_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            database_error(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
    }

    #[test]
    fn column_conversions_reject_out_of_range() {
        assert_eq!(to_count(7), Ok(7));
        assert!(to_count(-1).is_err());
        assert!(to_count(i64::MAX).is_err());
        assert_eq!(to_money(2_500), Ok(Money::from_cents(2_500)));
        assert!(to_money(-5).is_err());
        assert!(from_money(Money::from_cents(u64::MAX)).is_err());
        assert_eq!(to_ticket(3), Ok(3));
        assert!(to_ticket(-3).is_err());
        assert_eq!(to_usize(2), Ok(2));
        assert!(matches!(to_usize(-1), Err(StoreError::Serialization(_))));
    }
}
