//! Database schema for the access engine.
//!
//! Amounts are minor units in `BIGINT`. Counters carry `CHECK (>= 0)` so a faulty release
//! fails loudly instead of going negative.

use crate::database_error;
use event_access_core::error::StoreError;
use sqlx::PgPool;

/// Idempotent DDL statements, applied in order.
pub const MIGRATIONS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS access_items (
        id UUID PRIMARY KEY,
        event_id UUID NOT NULL,
        access_type TEXT NOT NULL,
        name TEXT NOT NULL,
        price BIGINT NOT NULL CHECK (price >= 0),
        currency TEXT NOT NULL,
        starts_at TIMESTAMPTZ,
        ends_at TIMESTAMPTZ,
        max_capacity BIGINT CHECK (max_capacity >= 0),
        registered_count BIGINT NOT NULL DEFAULT 0 CHECK (registered_count >= 0),
        waitlist_enabled BOOLEAN NOT NULL DEFAULT false,
        max_waitlist BIGINT CHECK (max_waitlist >= 0),
        waitlist_count BIGINT NOT NULL DEFAULT 0 CHECK (waitlist_count >= 0),
        available_from TIMESTAMPTZ,
        available_to TIMESTAMPTZ,
        conditions JSONB NOT NULL DEFAULT '[]'::jsonb,
        condition_logic TEXT NOT NULL DEFAULT 'AND',
        required_access_ids UUID[] NOT NULL DEFAULT '{}',
        active BOOLEAN NOT NULL DEFAULT true,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_access_items_event ON access_items(event_id)",
    r"
    CREATE TABLE IF NOT EXISTS access_waitlist (
        access_id UUID NOT NULL REFERENCES access_items(id) ON DELETE CASCADE,
        registration_id UUID NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        ticket BIGSERIAL NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (access_id, registration_id)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_access_waitlist_ticket ON access_waitlist(access_id, ticket)",
    r"
    CREATE TABLE IF NOT EXISTS registrations (
        id UUID PRIMARY KEY,
        event_id UUID NOT NULL,
        total_amount BIGINT NOT NULL CHECK (total_amount >= 0),
        base_amount BIGINT NOT NULL CHECK (base_amount >= 0),
        access_type_ids UUID[] NOT NULL DEFAULT '{}',
        price_breakdown JSONB,
        sponsorship_amount BIGINT NOT NULL DEFAULT 0 CHECK (sponsorship_amount >= 0)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS sponsorships (
        id UUID PRIMARY KEY,
        event_id UUID NOT NULL,
        code TEXT NOT NULL UNIQUE,
        covers_base_price BOOLEAN NOT NULL,
        covered_access_ids UUID[] NOT NULL DEFAULT '{}',
        total_amount BIGINT NOT NULL CHECK (total_amount >= 0),
        status TEXT NOT NULL DEFAULT 'PENDING',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_sponsorships_event ON sponsorships(event_id)",
    r"
    CREATE TABLE IF NOT EXISTS sponsorship_usages (
        sponsorship_id UUID NOT NULL REFERENCES sponsorships(id),
        registration_id UUID NOT NULL REFERENCES registrations(id),
        amount_applied BIGINT NOT NULL CHECK (amount_applied >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (sponsorship_id, registration_id)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_sponsorship_usages_registration ON sponsorship_usages(registration_id)",
];

/// Apply [`MIGRATIONS`].
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    let mut conn = pool.acquire().await.map_err(database_error)?;
    for statement in MIGRATIONS {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(database_error)?;
    }
    tracing::info!(statements = MIGRATIONS.len(), "Access schema migrated");
    Ok(())
}
