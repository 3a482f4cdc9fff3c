//! Grouping of access items into dated time slots for rendering.
//!
//! Items sharing an exact start instant are mutually exclusive: a registrant picks at most
//! one of them (`single`, radio semantics). An item alone at its start instant is
//! independently selectable (`multiple`, checkbox semantics).

use crate::types::AccessItem;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// How the items of a slot may be selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionType {
    /// Mutually exclusive (more than one item at the same start)
    Single,
    /// Independently selectable (exactly one item at this start)
    Multiple,
}

/// An access item annotated with capacity information for display.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedAccessItem {
    /// The item
    #[serde(flatten)]
    pub item: AccessItem,
    /// `max_capacity - registered_count`, or `None` when unlimited
    pub spots_remaining: Option<u32>,
    /// Capacity is limited and exhausted
    pub is_full: bool,
    /// Full, waitlist enabled, and the waitlist has room (or is unlimited)
    pub can_join_waitlist: bool,
}

impl From<AccessItem> for EnrichedAccessItem {
    fn from(item: AccessItem) -> Self {
        Self {
            spots_remaining: item.spots_remaining(),
            is_full: item.is_full(),
            can_join_waitlist: item.can_join_waitlist(),
            item,
        }
    }
}

/// Items starting at the same instant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    /// Shared start instant
    pub starts_at: DateTime<Utc>,
    /// Latest end among the slot's items
    pub ends_at: Option<DateTime<Utc>>,
    /// Exclusive or independent selection
    pub selection_type: SelectionType,
    /// Items in input order
    pub items: Vec<EnrichedAccessItem>,
}

/// Slots on one calendar day (UTC).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateGroup {
    /// `YYYY-MM-DD`
    pub date_key: String,
    /// Slots in chronological order
    pub slots: Vec<TimeSlot>,
}

/// Rendering structure for an event's items.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedAccessResponse {
    /// Dated groups in chronological order
    pub date_groups: Vec<DateGroup>,
    /// Items without a start time, in input order
    pub ungrouped: Vec<EnrichedAccessItem>,
}

/// Group items by date, then by exact start instant.
#[must_use]
pub fn group<I>(items: I) -> GroupedAccessResponse
where
    I: IntoIterator<Item = AccessItem>,
{
    let mut by_date: BTreeMap<NaiveDate, BTreeMap<DateTime<Utc>, Vec<AccessItem>>> =
        BTreeMap::new();
    let mut ungrouped = Vec::new();

    for item in items {
        match item.starts_at {
            Some(starts_at) => by_date
                .entry(starts_at.date_naive())
                .or_default()
                .entry(starts_at)
                .or_default()
                .push(item),
            None => ungrouped.push(EnrichedAccessItem::from(item)),
        }
    }

    let date_groups = by_date
        .into_iter()
        .map(|(date, slots)| DateGroup {
            date_key: date.format("%Y-%m-%d").to_string(),
            slots: slots
                .into_iter()
                .map(|(starts_at, items)| build_slot(starts_at, items))
                .collect(),
        })
        .collect();

    GroupedAccessResponse {
        date_groups,
        ungrouped,
    }
}

fn build_slot(starts_at: DateTime<Utc>, items: Vec<AccessItem>) -> TimeSlot {
    let selection_type = if items.len() > 1 {
        SelectionType::Single
    } else {
        SelectionType::Multiple
    };
    let ends_at = items.iter().filter_map(|item| item.ends_at).max();

    TimeSlot {
        starts_at,
        ends_at,
        selection_type,
        items: items.into_iter().map(EnrichedAccessItem::from).collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{AccessType, EventId, Money};
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    fn workshop(event_id: EventId, name: &str, starts_at: Option<DateTime<Utc>>) -> AccessItem {
        let mut item = AccessItem::new(
            event_id,
            AccessType::Workshop,
            name,
            Money::from_cents(2_500),
            "EUR",
        );
        item.starts_at = starts_at;
        item.ends_at = starts_at.map(|s| s + Duration::hours(2));
        item
    }

    #[test]
    fn same_start_forms_single_slot() {
        let event = EventId::new();
        let mut a = workshop(event, "A", Some(at(1, 9)));
        a.max_capacity = Some(30);
        let b = workshop(event, "B", Some(at(1, 9)));

        let grouped = group(vec![a, b]);
        assert_eq!(grouped.date_groups.len(), 1);
        let slot = &grouped.date_groups[0].slots[0];
        assert_eq!(slot.selection_type, SelectionType::Single);
        assert_eq!(slot.items.len(), 2);
        assert_eq!(slot.items[0].item.name, "A");
        assert_eq!(slot.items[0].spots_remaining, Some(30));
        assert_eq!(slot.items[1].spots_remaining, None);
    }

    #[test]
    fn groups_are_chronological_and_singletons_are_multiple() {
        let event = EventId::new();
        let grouped = group(vec![
            workshop(event, "Late", Some(at(2, 14))),
            workshop(event, "Unscheduled", None),
            workshop(event, "Early", Some(at(1, 9))),
            workshop(event, "Morning", Some(at(2, 9))),
        ]);

        let keys: Vec<&str> = grouped
            .date_groups
            .iter()
            .map(|g| g.date_key.as_str())
            .collect();
        assert_eq!(keys, ["2025-06-01", "2025-06-02"]);

        let second_day = &grouped.date_groups[1];
        assert_eq!(second_day.slots[0].items[0].item.name, "Morning");
        assert_eq!(second_day.slots[1].items[0].item.name, "Late");
        assert!(second_day
            .slots
            .iter()
            .all(|slot| slot.selection_type == SelectionType::Multiple));

        assert_eq!(grouped.ungrouped.len(), 1);
        assert_eq!(grouped.ungrouped[0].item.name, "Unscheduled");
    }

    #[test]
    fn slot_end_is_latest_item_end() {
        let event = EventId::new();
        let short = workshop(event, "Short", Some(at(1, 9)));
        let mut long = workshop(event, "Long", Some(at(1, 9)));
        long.ends_at = Some(at(1, 17));

        let grouped = group(vec![short, long]);
        assert_eq!(grouped.date_groups[0].slots[0].ends_at, Some(at(1, 17)));
    }

    #[test]
    fn enrichment_flags_full_and_waitlist() {
        let event = EventId::new();
        let mut item = workshop(event, "Popular", Some(at(1, 9)));
        item.max_capacity = Some(10);
        item.registered_count = 10;
        item.waitlist_enabled = true;
        item.max_waitlist = Some(5);
        item.waitlist_count = 5;

        let enriched = EnrichedAccessItem::from(item.clone());
        assert_eq!(enriched.spots_remaining, Some(0));
        assert!(enriched.is_full);
        assert!(!enriched.can_join_waitlist);

        item.max_waitlist = None;
        assert!(EnrichedAccessItem::from(item).can_join_waitlist);
    }

    #[test]
    fn serializes_in_camel_case() {
        let event = EventId::new();
        let grouped = group(vec![workshop(event, "Solo", Some(at(1, 9)))]);
        let json = serde_json::to_value(&grouped).unwrap();
        let slot = &json["dateGroups"][0]["slots"][0];
        assert_eq!(slot["selectionType"], "multiple");
        assert_eq!(slot["items"][0]["name"], "Solo");
        assert_eq!(slot["items"][0]["isFull"], false);
    }
}
