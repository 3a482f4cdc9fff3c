//! Pre-checkout validation of a registrant's access selections.
//!
//! Every check runs and every problem is collected so a client can show the full list in one
//! round trip. The result is advisory: capacity is read from snapshots and can race with
//! concurrent checkouts, so [`CapacityReservation`](crate::capacity::CapacityReservation)
//! re-checks atomically when counters are committed.

use crate::availability::AvailabilityWindow;
use crate::capacity::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::catalog::AccessCatalog;
use crate::condition::{FormData, evaluate_conditions};
use crate::environment::Clock;
use crate::error::Result;
use crate::types::{AccessId, AccessItem, EventId, Selection};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of validating a selection set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// True iff `errors` is empty
    pub valid: bool,
    /// Blocking problems, in check order
    pub errors: Vec<String>,
    /// Non-blocking information (e.g. the registrant will be waitlisted)
    pub notices: Vec<String>,
}

/// A selection resolved against the catalog, quantities of repeated ids merged.
struct Resolved<'a> {
    item: &'a AccessItem,
    quantity: u32,
}

/// Validate `selections` against an event's items at `now`.
#[must_use]
pub fn validate_selections(
    items: &[AccessItem],
    event_id: EventId,
    selections: &[Selection],
    form_data: &FormData,
    now: DateTime<Utc>,
) -> ValidationResult {
    let catalog: HashMap<AccessId, &AccessItem> = items
        .iter()
        .filter(|item| item.event_id == event_id)
        .map(|item| (item.id, item))
        .collect();

    let mut errors = Vec::new();
    let mut notices = Vec::new();

    // Existence. Repeated ids merge into one entry.
    let mut resolved: Vec<Resolved<'_>> = Vec::new();
    let mut positions: HashMap<AccessId, usize> = HashMap::new();
    for selection in selections {
        let Some(item) = catalog
            .get(&selection.access_id)
            .copied()
            .filter(|item| item.active)
        else {
            errors.push(format!("Access item {} not found", selection.access_id));
            continue;
        };
        if selection.quantity == 0 {
            errors.push(format!("Invalid quantity for {}: must be at least 1", item.name));
            continue;
        }
        match positions.get(&item.id) {
            Some(&index) => {
                resolved[index].quantity =
                    resolved[index].quantity.saturating_add(selection.quantity);
            }
            None => {
                positions.insert(item.id, resolved.len());
                resolved.push(Resolved {
                    item,
                    quantity: selection.quantity,
                });
            }
        }
    }
    let selected: HashSet<AccessId> = resolved.iter().map(|r| r.item.id).collect();

    // Time conflicts.
    let mut by_start: BTreeMap<DateTime<Utc>, Vec<&str>> = BTreeMap::new();
    for entry in &resolved {
        if let Some(starts_at) = entry.item.starts_at {
            by_start
                .entry(starts_at)
                .or_default()
                .push(entry.item.name.as_str());
        }
    }
    for names in by_start.values().filter(|names| names.len() > 1) {
        errors.push(format!(
            "Time conflict: {} are scheduled at the same time",
            names.join(", ")
        ));
    }

    for Resolved { item, quantity } in &resolved {
        for required in &item.required_access_ids {
            if !selected.contains(required) {
                let required_name = catalog
                    .get(required)
                    .map_or_else(|| required.to_string(), |r| r.name.clone());
                errors.push(format!("{} requires {required_name}", item.name));
            }
        }

        match AvailabilityWindow::check(item, now) {
            AvailabilityWindow::Open => {}
            AvailabilityWindow::NotYetOpen => {
                errors.push(format!("{} is not yet available", item.name));
            }
            AvailabilityWindow::Closed => {
                errors.push(format!("{} is no longer available", item.name));
            }
        }

        if !evaluate_conditions(&item.conditions, item.condition_logic, form_data) {
            errors.push(format!(
                "{} is not available based on your form answers",
                item.name
            ));
        }

        if item.spots_remaining().is_some_and(|spots| *quantity > spots) {
            if item.waitlist_enabled {
                notices.push(format!(
                    "{} is full; the selection will be added to the waitlist",
                    item.name
                ));
            } else {
                errors.push(format!("{} is full", item.name));
            }
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        notices,
    }
}

/// Validates selections against the catalog at the injected clock's "now".
#[derive(Clone)]
pub struct SelectionValidator {
    catalog: Arc<dyn AccessCatalog>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SelectionValidator {
    /// Creates a validator over `catalog` with the default store timeout.
    #[must_use]
    pub const fn new(catalog: Arc<dyn AccessCatalog>, clock: Arc<dyn Clock>) -> Self {
        Self::with_timeout(catalog, clock, DEFAULT_STORE_TIMEOUT)
    }

    /// Creates a validator whose catalog reads give up after `timeout`.
    #[must_use]
    pub const fn with_timeout(
        catalog: Arc<dyn AccessCatalog>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            clock,
            timeout,
        }
    }

    /// Load the event's items and validate `selections` against them.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Store`](crate::error::AccessError::Store) if the catalog cannot
    /// be read in time. Selection problems are reported in the result, not as errors.
    #[tracing::instrument(skip(self, selections, form_data), fields(event_id = %event_id, selections = selections.len()))]
    pub async fn validate(
        &self,
        event_id: EventId,
        selections: &[Selection],
        form_data: &FormData,
    ) -> Result<ValidationResult> {
        let items = bounded(self.timeout, self.catalog.load_event_items(event_id)).await?;
        let result = validate_selections(&items, event_id, selections, form_data, self.clock.now());
        tracing::debug!(
            valid = result.valid,
            errors = result.errors.len(),
            notices = result.notices.len(),
            "Selection validated"
        );
        Ok(result)
    }
}
