//! Visibility of access items for a registrant.

use crate::condition::{FormData, evaluate_conditions};
use crate::types::{AccessId, AccessItem};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Where `now` falls relative to an item's selection window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AvailabilityWindow {
    /// Inside the window (or no window set)
    Open,
    /// Before `available_from`
    NotYetOpen,
    /// After `available_to`
    Closed,
}

impl AvailabilityWindow {
    /// Classify `now` against the item's `available_from`/`available_to`. Both bounds are
    /// inclusive.
    #[must_use]
    pub fn check(item: &AccessItem, now: DateTime<Utc>) -> Self {
        if item.available_from.is_some_and(|from| from > now) {
            Self::NotYetOpen
        } else if item.available_to.is_some_and(|to| to < now) {
            Self::Closed
        } else {
            Self::Open
        }
    }
}

/// Whether the item should be offered to a registrant right now.
///
/// True iff the item is active, its selection window is open, its conditions pass against
/// `form_data`, and every prerequisite is already in `selected_ids`.
#[must_use]
pub fn is_visible(
    item: &AccessItem,
    now: DateTime<Utc>,
    form_data: &FormData,
    selected_ids: &HashSet<AccessId>,
) -> bool {
    item.active
        && AvailabilityWindow::check(item, now) == AvailabilityWindow::Open
        && evaluate_conditions(&item.conditions, item.condition_logic, form_data)
        && item
            .required_access_ids
            .iter()
            .all(|id| selected_ids.contains(id))
}

/// Filter `items` down to the visible ones, preserving order.
#[must_use]
pub fn visible_items<'a>(
    items: &'a [AccessItem],
    now: DateTime<Utc>,
    form_data: &FormData,
    selected_ids: &HashSet<AccessId>,
) -> Vec<&'a AccessItem> {
    items
        .iter()
        .filter(|item| is_visible(item, now, form_data, selected_ids))
        .collect()
}
