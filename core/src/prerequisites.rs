//! Prerequisite graph validation.
//!
//! Prerequisites form a directed graph `item → required items` per event. Edits must keep it
//! acyclic. Detection is an iterative white/gray/black depth-first traversal so large events
//! cannot exhaust the call stack.

use crate::error::{AccessError, Result};
use crate::types::{AccessId, AccessItem};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Adjacency list of an event's prerequisite relation (`id → required ids`).
#[derive(Clone, Debug, Default)]
pub struct PrerequisiteGraph {
    adjacency: HashMap<AccessId, Vec<AccessId>>,
}

impl PrerequisiteGraph {
    /// Build the graph from an event's items.
    #[must_use]
    pub fn from_items(items: &[AccessItem]) -> Self {
        let adjacency = items
            .iter()
            .map(|item| (item.id, item.required_access_ids.iter().copied().collect()))
            .collect();
        Self { adjacency }
    }

    /// Replace `item_id`'s outgoing edges, as an edit would.
    #[must_use]
    pub fn with_edges(mut self, item_id: AccessId, required: &[AccessId]) -> Self {
        self.adjacency.insert(item_id, required.to_vec());
        self
    }

    /// Items `item_id` directly requires.
    #[must_use]
    pub fn required_by(&self, item_id: &AccessId) -> &[AccessId] {
        self.adjacency.get(item_id).map_or(&[], Vec::as_slice)
    }

    /// Find a cycle reachable from `start`, returned as a closed path (first == last).
    #[must_use]
    pub fn find_cycle_from(&self, start: AccessId) -> Option<Vec<AccessId>> {
        let mut colors = HashMap::new();
        self.visit(start, &mut colors)
    }

    /// Find any cycle in the whole graph.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<AccessId>> {
        let mut nodes: Vec<AccessId> = self.adjacency.keys().copied().collect();
        nodes.sort_unstable();

        let mut colors = HashMap::new();
        nodes.into_iter().find_map(|node| {
            if colors.get(&node).copied().unwrap_or(Color::White) == Color::White {
                self.visit(node, &mut colors)
            } else {
                None
            }
        })
    }

    fn visit(
        &self,
        start: AccessId,
        colors: &mut HashMap<AccessId, Color>,
    ) -> Option<Vec<AccessId>> {
        // Each frame is (node, index of the next child to explore).
        let mut stack: Vec<(AccessId, usize)> = vec![(start, 0)];
        colors.insert(start, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let children = self.required_by(&node);

            let Some(&child) = children.get(next) else {
                colors.insert(node, Color::Black);
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match colors.get(&child).copied().unwrap_or(Color::White) {
                Color::White => {
                    colors.insert(child, Color::Gray);
                    stack.push((child, 0));
                }
                Color::Gray => {
                    let entry = stack.iter().position(|(id, _)| *id == child).unwrap_or(0);
                    let mut path: Vec<AccessId> =
                        stack[entry..].iter().map(|(id, _)| *id).collect();
                    path.push(child);
                    return Some(path);
                }
                Color::Black => {}
            }
        }

        None
    }
}

/// Validate a proposed set of prerequisites for `item_id` against the event's items.
///
/// # Errors
///
/// - [`AccessError::CircularDependency`] if `item_id` requires itself or the new edges close
///   a cycle anywhere reachable from `item_id`
/// - [`AccessError::AccessNotFound`] if a proposed id is not an item of the event
pub fn validate_no_cycle(
    event_items: &[AccessItem],
    item_id: AccessId,
    proposed_required_ids: &[AccessId],
) -> Result<()> {
    if proposed_required_ids.contains(&item_id) {
        return Err(AccessError::CircularDependency {
            path: vec![item_id, item_id],
        });
    }

    let known: HashSet<AccessId> = event_items.iter().map(|item| item.id).collect();
    if let Some(missing) = proposed_required_ids.iter().find(|id| !known.contains(id)) {
        return Err(AccessError::AccessNotFound(*missing));
    }

    let mut required = proposed_required_ids.to_vec();
    required.sort_unstable();
    required.dedup();

    let graph = PrerequisiteGraph::from_items(event_items).with_edges(item_id, &required);
    match graph.find_cycle_from(item_id) {
        Some(path) => {
            tracing::info!(
                access_id = %item_id,
                cycle_len = path.len() - 1,
                "Rejected prerequisite edit that would create a cycle"
            );
            Err(AccessError::CircularDependency { path })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::types::{AccessType, EventId, Money};

    fn items(n: usize) -> Vec<AccessItem> {
        let event_id = EventId::new();
        (0..n)
            .map(|i| {
                AccessItem::new(
                    event_id,
                    AccessType::Session,
                    format!("Session {i}"),
                    Money::ZERO,
                    "EUR",
                )
            })
            .collect()
    }

    fn require(items: &mut [AccessItem], from: usize, to: usize) {
        let target = items[to].id;
        items[from].required_access_ids.insert(target);
    }

    #[test]
    fn accepts_edges_on_a_chain() {
        let mut items = items(3);
        require(&mut items, 1, 0);
        let (a, c) = (items[0].id, items[2].id);
        assert!(validate_no_cycle(&items, c, &[items[1].id, a]).is_ok());
    }

    #[test]
    fn rejects_self_reference() {
        let items = items(1);
        let id = items[0].id;
        let error = validate_no_cycle(&items, id, &[id]).unwrap_err();
        assert_eq!(error.code(), ErrorCode::AccessCircularDependency);
    }

    #[test]
    fn rejects_unknown_ids() {
        let items = items(2);
        let stranger = AccessId::new();
        let error = validate_no_cycle(&items, items[0].id, &[stranger]).unwrap_err();
        assert_eq!(error, AccessError::AccessNotFound(stranger));
    }

    #[test]
    fn rejects_edge_that_closes_a_cycle() {
        // 0 requires 1, 1 requires 2; proposing 2 requires 0 closes the loop.
        let mut items = items(3);
        require(&mut items, 0, 1);
        require(&mut items, 1, 2);
        let (a, b, c) = (items[0].id, items[1].id, items[2].id);

        let error = validate_no_cycle(&items, c, &[a]).unwrap_err();
        assert_eq!(
            error,
            AccessError::CircularDependency {
                path: vec![c, a, b, c]
            }
        );
    }

    #[test]
    fn replacing_edges_can_break_a_cycle() {
        let mut items = items(2);
        require(&mut items, 0, 1);
        require(&mut items, 1, 0);
        let (a, b) = (items[0].id, items[1].id);

        assert!(PrerequisiteGraph::from_items(&items).find_cycle().is_some());
        assert!(validate_no_cycle(&items, b, &[]).is_ok());
        assert!(validate_no_cycle(&items, a, &[b]).is_err());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut items = items(4);
        require(&mut items, 0, 1);
        require(&mut items, 0, 2);
        require(&mut items, 1, 3);
        require(&mut items, 2, 3);
        assert!(PrerequisiteGraph::from_items(&items).find_cycle().is_none());
    }

    #[test]
    fn long_chain_does_not_overflow() {
        let mut items = items(20_000);
        for i in 0..items.len() - 1 {
            require(&mut items, i, i + 1);
        }
        let last = items[items.len() - 1].id;
        let first = items[0].id;
        assert!(validate_no_cycle(&items, last, &[first]).is_err());
    }
}
