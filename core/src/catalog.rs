//! Organizer-side access item guards and the catalog read collaborator.

use crate::capacity::StoreFuture;
use crate::error::{AccessError, Result};
use crate::prerequisites::PrerequisiteGraph;
use crate::types::{AccessItem, EventId, EventWindow};
use chrono::{DateTime, Utc};

/// Read access to an event's configured items.
///
/// Counter fields on the returned items are snapshots and may already be stale.
pub trait AccessCatalog: Send + Sync {
    /// Every item of `event_id`, active or not, in display order.
    fn load_event_items(&self, event_id: EventId) -> StoreFuture<'_, Vec<AccessItem>>;
}

/// Check an item's schedule and selection window before it is saved.
///
/// # Errors
///
/// - [`AccessError::DateOutOfBounds`] if `starts_at` or `ends_at` falls outside the event
/// - [`AccessError::BadRequest`] if the item ends before it starts or its selection window
///   closes before it opens
pub fn validate_schedule(item: &AccessItem, event: &EventWindow) -> Result<()> {
    let outside = [item.starts_at, item.ends_at]
        .into_iter()
        .flatten()
        .any(|instant| !event.contains(instant));
    if outside {
        return Err(AccessError::DateOutOfBounds {
            name: item.name.clone(),
        });
    }

    if inverted(item.starts_at, item.ends_at) {
        return Err(AccessError::BadRequest(format!(
            "{} ends before it starts",
            item.name
        )));
    }

    if inverted(item.available_from, item.available_to) {
        return Err(AccessError::BadRequest(format!(
            "{} closes for selection before it opens",
            item.name
        )));
    }

    Ok(())
}

fn inverted(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    matches!((start, end), (Some(start), Some(end)) if end < start)
}

/// Refuse to remove an item anyone has selected or is waiting for.
///
/// # Errors
///
/// [`AccessError::HasRegistrations`] if either counter is non-zero.
pub fn ensure_removable(item: &AccessItem) -> Result<()> {
    if item.registered_count > 0 || item.waitlist_count > 0 {
        return Err(AccessError::HasRegistrations {
            access_id: item.id,
            registered: item.registered_count,
            waitlisted: item.waitlist_count,
        });
    }
    Ok(())
}

/// Refuse a capacity edit that would leave existing registrations over the cap.
///
/// # Errors
///
/// [`AccessError::BadRequest`] if `new_max_capacity` is below `registered_count`.
pub fn validate_capacity_change(item: &AccessItem, new_max_capacity: Option<u32>) -> Result<()> {
    match new_max_capacity {
        Some(max) if max < item.registered_count => Err(AccessError::BadRequest(format!(
            "capacity {max} for {} is below its {} registrations",
            item.name, item.registered_count
        ))),
        _ => Ok(()),
    }
}

/// Check a whole event's prerequisite graph as loaded from storage.
///
/// # Errors
///
/// [`AccessError::CircularDependency`] with the offending path if any cycle exists.
pub fn validate_event_graph(items: &[AccessItem]) -> Result<()> {
    match PrerequisiteGraph::from_items(items).find_cycle() {
        Some(path) => {
            tracing::warn!(cycle_len = path.len() - 1, "Stored prerequisite graph has a cycle");
            Err(AccessError::CircularDependency { path })
        }
        None => Ok(()),
    }
}
