//! Sponsorships, usages and registration credits.
//!
//! Every commit locks the sponsorship row (`FOR UPDATE`) before touching usages, so a link
//! racing a cancel either sees the cancellation or finishes before it. After any usage
//! change the registration's `sponsorship_amount` is rewritten from `SUM(amount_applied)`
//! and the sponsorship status from its usage count, in the same transaction. A coverage edit
//! caps existing usages at the new total before recomputing their registrations' credit.

use crate::{database_error, from_money, to_money, to_usize};
use event_access_core::capacity::StoreFuture;
use event_access_core::error::StoreError;
use event_access_core::ledger::{
    CancelCommit, CoverageCommit, LinkCommit, RegistrationCredit, SponsorshipStore,
    UnlinkCommit,
};
use event_access_core::sponsorship::determine_sponsorship_status;
use event_access_core::types::{
    AccessId, EventId, Money, PriceBreakdown, RegistrationId, RegistrationSnapshot,
    Sponsorship, SponsorshipId, SponsorshipStatus, SponsorshipUsage,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

/// `PostgreSQL` implementation of [`SponsorshipStore`].
#[derive(Clone, Debug)]
pub struct PostgresSponsorshipStore {
    pool: PgPool,
}

impl PostgresSponsorshipStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the coverage-relevant view of a registration.
    ///
    /// `sponsorship_amount` is not written on conflict; only usage commits change it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the breakdown cannot be encoded, or
    /// [`StoreError::Database`] if the upsert fails.
    pub async fn save_registration(
        &self,
        registration: &RegistrationSnapshot,
    ) -> Result<(), StoreError> {
        let breakdown = registration
            .price_breakdown
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO registrations (
                id, event_id, total_amount, base_amount, access_type_ids,
                price_breakdown, sponsorship_amount
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                total_amount = EXCLUDED.total_amount,
                base_amount = EXCLUDED.base_amount,
                access_type_ids = EXCLUDED.access_type_ids,
                price_breakdown = EXCLUDED.price_breakdown
            ",
        )
        .bind(*registration.id.as_uuid())
        .bind(*registration.event_id.as_uuid())
        .bind(from_money(registration.total_amount)?)
        .bind(from_money(registration.base_amount)?)
        .bind(uuids(&registration.access_type_ids))
        .bind(breakdown)
        .bind(from_money(registration.sponsorship_amount)?)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    /// Usages applied to a registration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn load_usages(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Vec<SponsorshipUsage>, StoreError> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r"
            SELECT sponsorship_id, amount_applied
            FROM sponsorship_usages
            WHERE registration_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(*registration_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.into_iter()
            .map(|(sponsorship_id, amount)| {
                Ok(SponsorshipUsage {
                    sponsorship_id: SponsorshipId::from_uuid(sponsorship_id),
                    registration_id,
                    amount_applied: to_money(amount)?,
                })
            })
            .collect()
    }

    async fn link(&self, usage: SponsorshipUsage) -> Result<LinkCommit, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let Some(current) = lock_status(&mut tx, usage.sponsorship_id).await? else {
            return Ok(LinkCommit::Missing);
        };
        if current == SponsorshipStatus::Cancelled {
            return Ok(LinkCommit::Cancelled);
        }

        let registration: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM registrations WHERE id = $1 FOR UPDATE")
                .bind(*usage.registration_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(database_error)?;
        if registration.is_none() {
            return Ok(LinkCommit::Missing);
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO sponsorship_usages (sponsorship_id, registration_id, amount_applied)
            VALUES ($1, $2, $3)
            ON CONFLICT (sponsorship_id, registration_id) DO NOTHING
            ",
        )
        .bind(*usage.sponsorship_id.as_uuid())
        .bind(*usage.registration_id.as_uuid())
        .bind(from_money(usage.amount_applied)?)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?;
        if inserted.rows_affected() == 0 {
            return Ok(LinkCommit::AlreadyLinked);
        }

        let credit = recompute_credit(&mut tx, usage.registration_id).await?;
        let status = recompute_status(&mut tx, usage.sponsorship_id, current).await?;
        tx.commit().await.map_err(database_error)?;

        metrics::counter!("sponsorship.linked").increment(1);
        Ok(LinkCommit::Linked { credit, status })
    }

    async fn unlink(
        &self,
        sponsorship_id: SponsorshipId,
        registration_id: RegistrationId,
    ) -> Result<UnlinkCommit, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let Some(current) = lock_status(&mut tx, sponsorship_id).await? else {
            return Ok(UnlinkCommit::NotLinked);
        };

        let removed: Option<(i64,)> = sqlx::query_as(
            r"
            DELETE FROM sponsorship_usages
            WHERE sponsorship_id = $1 AND registration_id = $2
            RETURNING amount_applied
            ",
        )
        .bind(*sponsorship_id.as_uuid())
        .bind(*registration_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;
        let Some((amount_removed,)) = removed else {
            return Ok(UnlinkCommit::NotLinked);
        };

        let credit = recompute_credit(&mut tx, registration_id).await?;
        let status = recompute_status(&mut tx, sponsorship_id, current).await?;
        tx.commit().await.map_err(database_error)?;

        metrics::counter!("sponsorship.unlinked").increment(1);
        Ok(UnlinkCommit::Unlinked {
            amount_removed: to_money(amount_removed)?,
            credit,
            status,
        })
    }

    async fn cancel(&self, sponsorship_id: SponsorshipId) -> Result<CancelCommit, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        match lock_status(&mut tx, sponsorship_id).await? {
            None => return Ok(CancelCommit::Missing),
            Some(SponsorshipStatus::Cancelled) => return Ok(CancelCommit::AlreadyCancelled),
            Some(_) => {}
        }

        sqlx::query("UPDATE sponsorships SET status = $2 WHERE id = $1")
            .bind(*sponsorship_id.as_uuid())
            .bind(SponsorshipStatus::Cancelled.as_str())
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        let removed: Vec<(Uuid,)> = sqlx::query_as(
            r"
            DELETE FROM sponsorship_usages
            WHERE sponsorship_id = $1
            RETURNING registration_id
            ",
        )
        .bind(*sponsorship_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(database_error)?;

        let registrations: BTreeSet<RegistrationId> = removed
            .into_iter()
            .map(|(id,)| RegistrationId::from_uuid(id))
            .collect();
        let mut affected = Vec::with_capacity(registrations.len());
        for registration_id in registrations {
            affected.push(recompute_credit(&mut tx, registration_id).await?);
        }
        tx.commit().await.map_err(database_error)?;

        metrics::counter!("sponsorship.cancelled").increment(1);
        Ok(CancelCommit::Cancelled { affected })
    }

    async fn update_coverage(
        &self,
        sponsorship_id: SponsorshipId,
        covers_base_price: bool,
        covered_access_ids: BTreeSet<AccessId>,
        total_amount: Money,
    ) -> Result<CoverageCommit, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        match lock_status(&mut tx, sponsorship_id).await? {
            None => return Ok(CoverageCommit::Missing),
            Some(SponsorshipStatus::Cancelled) => return Ok(CoverageCommit::Cancelled),
            Some(_) => {}
        }

        sqlx::query(
            r"
            UPDATE sponsorships
            SET covers_base_price = $2, covered_access_ids = $3, total_amount = $4
            WHERE id = $1
            ",
        )
        .bind(*sponsorship_id.as_uuid())
        .bind(covers_base_price)
        .bind(uuids(&covered_access_ids))
        .bind(from_money(total_amount)?)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?;

        let capped: Vec<(Uuid,)> = sqlx::query_as(
            r"
            UPDATE sponsorship_usages
            SET amount_applied = $2
            WHERE sponsorship_id = $1 AND amount_applied > $2
            RETURNING registration_id
            ",
        )
        .bind(*sponsorship_id.as_uuid())
        .bind(from_money(total_amount)?)
        .fetch_all(&mut *tx)
        .await
        .map_err(database_error)?;

        let mut recapped = Vec::with_capacity(capped.len());
        for (registration_id,) in capped {
            recapped
                .push(recompute_credit(&mut tx, RegistrationId::from_uuid(registration_id)).await?);
        }
        tx.commit().await.map_err(database_error)?;

        Ok(CoverageCommit::Updated { recapped })
    }
}

impl SponsorshipStore for PostgresSponsorshipStore {
    fn code_exists<'a>(&'a self, code: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS(SELECT 1 FROM sponsorships WHERE code = $1)")
                    .bind(code)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(database_error)?;
            Ok(exists)
        })
    }

    fn insert_sponsorships(&self, sponsorships: Vec<Sponsorship>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(database_error)?;
            for sponsorship in &sponsorships {
                sqlx::query(
                    r"
                    INSERT INTO sponsorships (
                        id, event_id, code, covers_base_price, covered_access_ids,
                        total_amount, status
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ",
                )
                .bind(*sponsorship.id.as_uuid())
                .bind(*sponsorship.event_id.as_uuid())
                .bind(&sponsorship.code)
                .bind(sponsorship.covers_base_price)
                .bind(uuids(&sponsorship.covered_access_ids))
                .bind(from_money(sponsorship.total_amount)?)
                .bind(sponsorship.status.as_str())
                .execute(&mut *tx)
                .await
                .map_err(database_error)?;
            }
            tx.commit().await.map_err(database_error)?;

            tracing::debug!(count = sponsorships.len(), "Sponsorships inserted");
            Ok(())
        })
    }

    fn load_sponsorship(&self, id: SponsorshipId) -> StoreFuture<'_, Option<Sponsorship>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, event_id, code, covers_base_price, covered_access_ids,
                       total_amount, status
                FROM sponsorships
                WHERE id = $1
                ",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

            row.as_ref().map(row_to_sponsorship).transpose()
        })
    }

    fn load_registration(
        &self,
        id: RegistrationId,
    ) -> StoreFuture<'_, Option<RegistrationSnapshot>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, event_id, total_amount, base_amount, access_type_ids,
                       price_breakdown, sponsorship_amount
                FROM registrations
                WHERE id = $1
                ",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

            row.as_ref().map(row_to_registration).transpose()
        })
    }

    fn load_linked_sponsorships(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Vec<Sponsorship>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT s.id, s.event_id, s.code, s.covers_base_price, s.covered_access_ids,
                       s.total_amount, s.status
                FROM sponsorships s
                JOIN sponsorship_usages u ON u.sponsorship_id = s.id
                WHERE u.registration_id = $1
                ORDER BY u.created_at ASC
                ",
            )
            .bind(*registration_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

            rows.iter().map(row_to_sponsorship).collect()
        })
    }

    fn commit_link(&self, usage: SponsorshipUsage) -> StoreFuture<'_, LinkCommit> {
        Box::pin(self.link(usage))
    }

    fn commit_unlink(
        &self,
        sponsorship_id: SponsorshipId,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, UnlinkCommit> {
        Box::pin(self.unlink(sponsorship_id, registration_id))
    }

    fn commit_cancel(&self, sponsorship_id: SponsorshipId) -> StoreFuture<'_, CancelCommit> {
        Box::pin(self.cancel(sponsorship_id))
    }

    fn commit_coverage(
        &self,
        sponsorship_id: SponsorshipId,
        covers_base_price: bool,
        covered_access_ids: BTreeSet<AccessId>,
        total_amount: Money,
    ) -> StoreFuture<'_, CoverageCommit> {
        Box::pin(self.update_coverage(
            sponsorship_id,
            covers_base_price,
            covered_access_ids,
            total_amount,
        ))
    }
}

// ============================================================================
// Transaction Helpers
// ============================================================================

async fn lock_status(
    conn: &mut PgConnection,
    sponsorship_id: SponsorshipId,
) -> Result<Option<SponsorshipStatus>, StoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT status FROM sponsorships WHERE id = $1 FOR UPDATE")
            .bind(*sponsorship_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(database_error)?;

    row.map(|(status,)| parse_status(&status)).transpose()
}

async fn recompute_credit(
    conn: &mut PgConnection,
    registration_id: RegistrationId,
) -> Result<RegistrationCredit, StoreError> {
    let (amount,): (i64,) = sqlx::query_as(
        r"
        UPDATE registrations
        SET sponsorship_amount = (
            SELECT COALESCE(SUM(amount_applied), 0)::BIGINT
            FROM sponsorship_usages
            WHERE registration_id = $1
        )
        WHERE id = $1
        RETURNING sponsorship_amount
        ",
    )
    .bind(*registration_id.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(database_error)?;

    Ok(RegistrationCredit {
        registration_id,
        sponsorship_amount: to_money(amount)?,
    })
}

async fn recompute_status(
    conn: &mut PgConnection,
    sponsorship_id: SponsorshipId,
    current: SponsorshipStatus,
) -> Result<SponsorshipStatus, StoreError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sponsorship_usages WHERE sponsorship_id = $1")
            .bind(*sponsorship_id.as_uuid())
            .fetch_one(&mut *conn)
            .await
            .map_err(database_error)?;

    let status = determine_sponsorship_status(current, to_usize(count)?);
    if status != current {
        sqlx::query("UPDATE sponsorships SET status = $2 WHERE id = $1")
            .bind(*sponsorship_id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *conn)
            .await
            .map_err(database_error)?;
    }
    Ok(status)
}

// ============================================================================
// Row Mapping
// ============================================================================

fn uuids(ids: &BTreeSet<AccessId>) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

fn parse_status(s: &str) -> Result<SponsorshipStatus, StoreError> {
    SponsorshipStatus::parse(s)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid sponsorship status: {s}")))
}

fn row_to_sponsorship(row: &PgRow) -> Result<Sponsorship, StoreError> {
    let covered: Vec<Uuid> = row.try_get("covered_access_ids").map_err(database_error)?;
    let status: String = row.try_get("status").map_err(database_error)?;

    Ok(Sponsorship {
        id: SponsorshipId::from_uuid(row.try_get("id").map_err(database_error)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(database_error)?),
        code: row.try_get("code").map_err(database_error)?,
        covers_base_price: row.try_get("covers_base_price").map_err(database_error)?,
        covered_access_ids: covered.into_iter().map(AccessId::from_uuid).collect(),
        total_amount: to_money(row.try_get("total_amount").map_err(database_error)?)?,
        status: parse_status(&status)?,
    })
}

fn row_to_registration(row: &PgRow) -> Result<RegistrationSnapshot, StoreError> {
    let access_type_ids: Vec<Uuid> = row.try_get("access_type_ids").map_err(database_error)?;
    let breakdown: Option<serde_json::Value> =
        row.try_get("price_breakdown").map_err(database_error)?;
    let price_breakdown = breakdown
        .map(serde_json::from_value::<PriceBreakdown>)
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(RegistrationSnapshot {
        id: RegistrationId::from_uuid(row.try_get("id").map_err(database_error)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(database_error)?),
        total_amount: to_money(row.try_get("total_amount").map_err(database_error)?)?,
        base_amount: to_money(row.try_get("base_amount").map_err(database_error)?)?,
        access_type_ids: access_type_ids.into_iter().map(AccessId::from_uuid).collect(),
        price_breakdown,
        sponsorship_amount: to_money(row.try_get("sponsorship_amount").map_err(database_error)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_column_rejects_unknown_values() {
        assert_eq!(parse_status("USED"), Ok(SponsorshipStatus::Used));
        assert!(matches!(
            parse_status("EXPIRED"),
            Err(StoreError::Serialization(_))
        ));
    }
}
