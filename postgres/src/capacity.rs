//! Capacity and waitlist counters.
//!
//! Each counter change is one conditional `UPDATE ... RETURNING`: the guard and the write
//! happen in the same statement, so concurrent callers on any replica cannot both pass a
//! guard that only one of them fits through. Joining the waitlist counts and queues in one
//! statement. Promotion and waitlisted releases touch both counter and queue, so they run in
//! one transaction holding the item row lock.

use crate::{database_error, to_count, to_ticket};
use event_access_core::capacity::{
    CapacityStore, CounterUpdate, Holding, PromotionOutcome, StoreFuture, WaitlistJoin,
    WaitlistPromotion,
};
use event_access_core::error::StoreError;
use event_access_core::types::{AccessId, RegistrationId};
use sqlx::PgPool;
use uuid::Uuid;

const RELEASE_REGISTERED: &str = r"
    UPDATE access_items
    SET registered_count = registered_count - $2
    WHERE id = $1 AND registered_count >= $2
    RETURNING registered_count + $2
";

// Counts and queues in one statement; the queue row keeps its ticket on a repeat join.
const JOIN_WAITLIST: &str = r"
    WITH joined AS (
        UPDATE access_items
        SET waitlist_count = waitlist_count + $3
        WHERE id = $1
          AND waitlist_enabled
          AND (max_waitlist IS NULL OR max_waitlist - waitlist_count >= $3)
        RETURNING id, waitlist_count - $3 AS previous
    ), queued AS (
        INSERT INTO access_waitlist (access_id, registration_id, quantity)
        SELECT id, $2, $3 FROM joined
        ON CONFLICT (access_id, registration_id)
        DO UPDATE SET quantity = access_waitlist.quantity + EXCLUDED.quantity
    )
    SELECT previous FROM joined
";

/// `PostgreSQL` implementation of [`CapacityStore`].
///
/// # Example
///
/// ```no_run
/// use event_access_core::CapacityReservation;
/// use event_access_postgres::PostgresCapacityStore;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(pool: sqlx::PgPool) {
/// let store = Arc::new(PostgresCapacityStore::new(pool));
/// let reservation = CapacityReservation::with_timeout(store, Duration::from_secs(5));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresCapacityStore {
    pool: PgPool,
}

impl PostgresCapacityStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, access_id: AccessId) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM access_items WHERE id = $1)")
                .bind(*access_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(database_error)?;
        Ok(exists)
    }

    async fn leave_waitlist(
        &self,
        access_id: AccessId,
        registration_id: RegistrationId,
        quantity: u32,
    ) -> Result<CounterUpdate, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let item: Option<(i64,)> =
            sqlx::query_as("SELECT waitlist_count FROM access_items WHERE id = $1 FOR UPDATE")
                .bind(*access_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(database_error)?;
        let Some((waitlisted,)) = item else {
            return Ok(CounterUpdate::Missing);
        };

        let entry: Option<(i64,)> = sqlx::query_as(
            r"
            SELECT quantity FROM access_waitlist
            WHERE access_id = $1 AND registration_id = $2
            FOR UPDATE
            ",
        )
        .bind(*access_id.as_uuid())
        .bind(*registration_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;

        let quantity = i64::from(quantity);
        let Some((queued,)) = entry else {
            return Ok(CounterUpdate::Rejected);
        };
        if queued < quantity || waitlisted < quantity {
            return Ok(CounterUpdate::Rejected);
        }

        sqlx::query("UPDATE access_items SET waitlist_count = waitlist_count - $2 WHERE id = $1")
            .bind(*access_id.as_uuid())
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        if queued == quantity {
            sqlx::query("DELETE FROM access_waitlist WHERE access_id = $1 AND registration_id = $2")
                .bind(*access_id.as_uuid())
                .bind(*registration_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(database_error)?;
        } else {
            sqlx::query(
                r"
                UPDATE access_waitlist SET quantity = quantity - $3
                WHERE access_id = $1 AND registration_id = $2
                ",
            )
            .bind(*access_id.as_uuid())
            .bind(*registration_id.as_uuid())
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        }

        tx.commit().await.map_err(database_error)?;

        Ok(CounterUpdate::Applied {
            previous: to_count(waitlisted)?,
        })
    }

    async fn promote(&self, access_id: AccessId) -> Result<PromotionOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let item: Option<(Option<i64>, i64, i64)> = sqlx::query_as(
            r"
            SELECT max_capacity, registered_count, waitlist_count
            FROM access_items
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(*access_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;
        let Some((max_capacity, registered, waitlisted)) = item else {
            return Ok(PromotionOutcome::Missing);
        };

        let head: Option<(Uuid, i64, i64)> = sqlx::query_as(
            r"
            SELECT registration_id, quantity, ticket
            FROM access_waitlist
            WHERE access_id = $1
            ORDER BY ticket ASC
            LIMIT 1
            FOR UPDATE
            ",
        )
        .bind(*access_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;
        let Some((registration_id, quantity, ticket)) = head else {
            return Ok(PromotionOutcome::NoneWaiting);
        };

        let fits = max_capacity.is_none_or(|max| max - registered >= quantity);
        if !fits || waitlisted < quantity {
            return Ok(PromotionOutcome::NoRoom);
        }

        let promotion = WaitlistPromotion {
            registration_id: RegistrationId::from_uuid(registration_id),
            access_id,
            quantity: to_count(quantity)?,
            ticket: to_ticket(ticket)?,
        };

        sqlx::query(
            r"
            UPDATE access_items
            SET registered_count = registered_count + $2,
                waitlist_count = waitlist_count - $2
            WHERE id = $1
            ",
        )
        .bind(*access_id.as_uuid())
        .bind(quantity)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?;

        sqlx::query("DELETE FROM access_waitlist WHERE access_id = $1 AND registration_id = $2")
            .bind(*access_id.as_uuid())
            .bind(registration_id)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        tx.commit().await.map_err(database_error)?;

        metrics::counter!("access.waitlist.promoted").increment(1);
        Ok(PromotionOutcome::Promoted(promotion))
    }
}

impl CapacityStore for PostgresCapacityStore {
    fn try_reserve(&self, access_id: AccessId, quantity: u32) -> StoreFuture<'_, CounterUpdate> {
        Box::pin(async move {
            let previous: Option<(i64,)> = sqlx::query_as(
                r"
                UPDATE access_items
                SET registered_count = registered_count + $2
                WHERE id = $1
                  AND (max_capacity IS NULL OR max_capacity - registered_count >= $2)
                RETURNING registered_count - $2
                ",
            )
            .bind(*access_id.as_uuid())
            .bind(i64::from(quantity))
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

            match previous {
                Some((previous,)) => {
                    metrics::counter!("access.reservation.confirmed").increment(1);
                    Ok(CounterUpdate::Applied {
                        previous: to_count(previous)?,
                    })
                }
                None if self.exists(access_id).await? => {
                    metrics::counter!("access.reservation.rejected").increment(1);
                    Ok(CounterUpdate::Rejected)
                }
                None => Ok(CounterUpdate::Missing),
            }
        })
    }

    fn try_join_waitlist(
        &self,
        access_id: AccessId,
        registration_id: RegistrationId,
        quantity: u32,
    ) -> StoreFuture<'_, WaitlistJoin> {
        Box::pin(async move {
            let previous: Option<(i64,)> = sqlx::query_as(JOIN_WAITLIST)
                .bind(*access_id.as_uuid())
                .bind(*registration_id.as_uuid())
                .bind(i64::from(quantity))
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?;

            if let Some((previous,)) = previous {
                metrics::counter!("access.reservation.waitlisted").increment(1);
                return Ok(WaitlistJoin::Joined {
                    previous: to_count(previous)?,
                });
            }

            let enabled: Option<(bool,)> =
                sqlx::query_as("SELECT waitlist_enabled FROM access_items WHERE id = $1")
                    .bind(*access_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(database_error)?;

            Ok(match enabled {
                None => WaitlistJoin::Missing,
                Some((false,)) => WaitlistJoin::Disabled,
                Some((true,)) => {
                    metrics::counter!("access.reservation.rejected").increment(1);
                    WaitlistJoin::Full
                }
            })
        })
    }

    fn try_release(
        &self,
        access_id: AccessId,
        quantity: u32,
        holding: Holding,
    ) -> StoreFuture<'_, CounterUpdate> {
        Box::pin(async move {
            if let Holding::Waitlisted(registration_id) = holding {
                return self
                    .leave_waitlist(access_id, registration_id, quantity)
                    .await;
            }

            let previous: Option<(i64,)> = sqlx::query_as(RELEASE_REGISTERED)
                .bind(*access_id.as_uuid())
                .bind(i64::from(quantity))
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?;

            match previous {
                Some((previous,)) => Ok(CounterUpdate::Applied {
                    previous: to_count(previous)?,
                }),
                None if self.exists(access_id).await? => Ok(CounterUpdate::Rejected),
                None => Ok(CounterUpdate::Missing),
            }
        })
    }

    fn promote_next(&self, access_id: AccessId) -> StoreFuture<'_, PromotionOutcome> {
        Box::pin(self.promote(access_id))
    }
}
