//! Per-batch grouping of link changes by interface

use crate::change::{Change, oper_state_change};
use crate::source::RouteMessage;
use std::collections::HashMap;
use std::collections::hash_map;

/// Changes observed in one receive batch, keyed by interface name
///
/// Each interface's list preserves kernel arrival order. A change set lives
/// for a single receive/notify cycle and is never merged with another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: HashMap<String, Vec<Change>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a change set from a batch of route messages
    ///
    /// Non-link messages and unknown operational state codes are skipped.
    pub fn from_messages(msgs: &[RouteMessage]) -> Self {
        let mut set = Self::new();
        for msg in msgs {
            let RouteMessage::Link(link) = msg else {
                continue;
            };
            if let Some(change) = oper_state_change(link.oper_state) {
                set.push(&link.name, change);
            }
        }
        set
    }

    /// Append a change for an interface
    pub fn push(&mut self, interface: &str, change: Change) {
        match self.changes.get_mut(interface) {
            Some(list) => list.push(change),
            None => {
                self.changes.insert(interface.to_string(), vec![change]);
            }
        }
    }

    /// Changes recorded for one interface, in arrival order
    pub fn get(&self, interface: &str) -> Option<&[Change]> {
        self.changes.get(interface).map(Vec::as_slice)
    }

    /// Number of interfaces with at least one change
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Total number of changes across all interfaces
    pub fn change_count(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Vec<Change>> {
        self.changes.iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = (&'a String, &'a Vec<Change>);
    type IntoIter = hash_map::Iter<'a, String, Vec<Change>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
