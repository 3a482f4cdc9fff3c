//! Access item catalog.

use crate::{database_error, from_money, to_count, to_money};
use event_access_core::capacity::StoreFuture;
use event_access_core::catalog::AccessCatalog;
use event_access_core::condition::{Condition, ConditionLogic};
use event_access_core::error::StoreError;
use event_access_core::types::{AccessId, AccessItem, AccessType, EventId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// `PostgreSQL` implementation of [`AccessCatalog`].
#[derive(Clone, Debug)]
pub struct PostgresAccessCatalog {
    pool: PgPool,
}

impl PostgresAccessCatalog {
    /// Create a catalog over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace an item's definition.
    ///
    /// Counters are only written on insert; an existing item keeps the counters the
    /// capacity store maintains.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the conditions cannot be encoded, or
    /// [`StoreError::Database`] if the upsert fails.
    pub async fn save_item(&self, item: &AccessItem) -> Result<(), StoreError> {
        let conditions = serde_json::to_value(&item.conditions)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let required: Vec<Uuid> = item
            .required_access_ids
            .iter()
            .map(|id| *id.as_uuid())
            .collect();

        sqlx::query(
            r"
            INSERT INTO access_items (
                id, event_id, access_type, name, price, currency, starts_at, ends_at,
                max_capacity, registered_count, waitlist_enabled, max_waitlist, waitlist_count,
                available_from, available_to, conditions, condition_logic,
                required_access_ids, active
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            ON CONFLICT (id) DO UPDATE SET
                access_type = EXCLUDED.access_type,
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                currency = EXCLUDED.currency,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                max_capacity = EXCLUDED.max_capacity,
                waitlist_enabled = EXCLUDED.waitlist_enabled,
                max_waitlist = EXCLUDED.max_waitlist,
                available_from = EXCLUDED.available_from,
                available_to = EXCLUDED.available_to,
                conditions = EXCLUDED.conditions,
                condition_logic = EXCLUDED.condition_logic,
                required_access_ids = EXCLUDED.required_access_ids,
                active = EXCLUDED.active
            ",
        )
        .bind(*item.id.as_uuid())
        .bind(*item.event_id.as_uuid())
        .bind(item.access_type.as_str())
        .bind(&item.name)
        .bind(from_money(item.price)?)
        .bind(&item.currency)
        .bind(item.starts_at)
        .bind(item.ends_at)
        .bind(item.max_capacity.map(i64::from))
        .bind(i64::from(item.registered_count))
        .bind(item.waitlist_enabled)
        .bind(item.max_waitlist.map(i64::from))
        .bind(i64::from(item.waitlist_count))
        .bind(item.available_from)
        .bind(item.available_to)
        .bind(conditions)
        .bind(logic_as_str(item.condition_logic))
        .bind(required)
        .bind(item.active)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    /// Delete an item. Callers check removability first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn delete_item(&self, access_id: AccessId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM access_items WHERE id = $1")
            .bind(*access_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(result.rows_affected() > 0)
    }
}

impl AccessCatalog for PostgresAccessCatalog {
    fn load_event_items(&self, event_id: EventId) -> StoreFuture<'_, Vec<AccessItem>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT
                    id, event_id, access_type, name, price, currency, starts_at, ends_at,
                    max_capacity, registered_count, waitlist_enabled, max_waitlist,
                    waitlist_count, available_from, available_to, conditions, condition_logic,
                    required_access_ids, active
                FROM access_items
                WHERE event_id = $1
                ORDER BY created_at ASC, id ASC
                ",
            )
            .bind(*event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

            rows.iter().map(row_to_item).collect()
        })
    }
}

const fn logic_as_str(logic: ConditionLogic) -> &'static str {
    match logic {
        ConditionLogic::And => "AND",
        ConditionLogic::Or => "OR",
    }
}

fn parse_logic(s: &str) -> Result<ConditionLogic, StoreError> {
    match s {
        "AND" => Ok(ConditionLogic::And),
        "OR" => Ok(ConditionLogic::Or),
        _ => Err(StoreError::Serialization(format!(
            "Invalid condition logic: {s}"
        ))),
    }
}

fn row_to_item(row: &PgRow) -> Result<AccessItem, StoreError> {
    let access_type: String = row.try_get("access_type").map_err(database_error)?;
    let access_type = AccessType::parse(&access_type)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid access type: {access_type}")))?;

    let conditions: serde_json::Value = row.try_get("conditions").map_err(database_error)?;
    let conditions: Vec<Condition> = serde_json::from_value(conditions)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let logic: String = row.try_get("condition_logic").map_err(database_error)?;
    let required: Vec<Uuid> = row.try_get("required_access_ids").map_err(database_error)?;
    let max_capacity: Option<i64> = row.try_get("max_capacity").map_err(database_error)?;
    let max_waitlist: Option<i64> = row.try_get("max_waitlist").map_err(database_error)?;

    Ok(AccessItem {
        id: AccessId::from_uuid(row.try_get("id").map_err(database_error)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(database_error)?),
        access_type,
        name: row.try_get("name").map_err(database_error)?,
        price: to_money(row.try_get("price").map_err(database_error)?)?,
        currency: row.try_get("currency").map_err(database_error)?,
        starts_at: row.try_get("starts_at").map_err(database_error)?,
        ends_at: row.try_get("ends_at").map_err(database_error)?,
        max_capacity: max_capacity.map(to_count).transpose()?,
        registered_count: to_count(row.try_get("registered_count").map_err(database_error)?)?,
        waitlist_enabled: row.try_get("waitlist_enabled").map_err(database_error)?,
        max_waitlist: max_waitlist.map(to_count).transpose()?,
        waitlist_count: to_count(row.try_get("waitlist_count").map_err(database_error)?)?,
        available_from: row.try_get("available_from").map_err(database_error)?,
        available_to: row.try_get("available_to").map_err(database_error)?,
        conditions,
        condition_logic: parse_logic(&logic)?,
        required_access_ids: required.into_iter().map(AccessId::from_uuid).collect(),
        active: row.try_get("active").map_err(database_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_logic_column_roundtrips() {
        for logic in [ConditionLogic::And, ConditionLogic::Or] {
            assert_eq!(parse_logic(logic_as_str(logic)), Ok(logic));
        }
        assert!(parse_logic("XOR").is_err());
    }
}
