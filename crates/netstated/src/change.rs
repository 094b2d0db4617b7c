//! Link operational state changes and subscription filters
//!
//! Maps kernel `IF_OPER_*` codes (RFC 2863 operational states) to
//! [`Change`] values delivered to subscribers.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Kernel operational state codes (IF_OPER_* from linux/if.h)
pub const IF_OPER_UNKNOWN: u8 = 0;
pub const IF_OPER_NOTPRESENT: u8 = 1;
pub const IF_OPER_DOWN: u8 = 2;
pub const IF_OPER_LOWERLAYERDOWN: u8 = 3;
pub const IF_OPER_TESTING: u8 = 4;
pub const IF_OPER_DORMANT: u8 = 5;
pub const IF_OPER_UP: u8 = 6;

/// An observed link operational state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Unknown,
    NotPresent,
    Down,
    LowerLayerDown,
    Testing,
    Dormant,
    Up,
}

impl Change {
    /// Every change value, in kernel code order
    pub const ALL: [Change; 7] = [
        Change::Unknown,
        Change::NotPresent,
        Change::Down,
        Change::LowerLayerDown,
        Change::Testing,
        Change::Dormant,
        Change::Up,
    ];

    /// Stable name used for logging and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Change::Unknown => "unknown",
            Change::NotPresent => "not_present",
            Change::Down => "down",
            Change::LowerLayerDown => "lower_layer_down",
            Change::Testing => "testing",
            Change::Dormant => "dormant",
            Change::Up => "up",
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Change {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Change::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown link change {:?}", s))
    }
}

/// Converts a kernel operational state code to a [`Change`]
///
/// Codes outside the known set return `None` and must be dropped by the
/// caller rather than reported.
pub fn oper_state_change(code: u8) -> Option<Change> {
    match code {
        IF_OPER_UNKNOWN => Some(Change::Unknown),
        IF_OPER_NOTPRESENT => Some(Change::NotPresent),
        IF_OPER_DOWN => Some(Change::Down),
        IF_OPER_LOWERLAYERDOWN => Some(Change::LowerLayerDown),
        IF_OPER_TESTING => Some(Change::Testing),
        IF_OPER_DORMANT => Some(Change::Dormant),
        IF_OPER_UP => Some(Change::Up),
        _ => None,
    }
}

/// Selects which changes a subscription receives
///
/// `Any` is only meaningful as a filter; it is never emitted as an event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    /// Every change for the interface
    #[default]
    Any,
    /// Only the listed changes
    Only(HashSet<Change>),
}

impl Filter {
    /// Build a filter accepting only the given changes
    ///
    /// An empty iterator yields a filter that matches nothing; the daemon
    /// configuration rejects an empty change list rather than building one.
    pub fn only<I: IntoIterator<Item = Change>>(changes: I) -> Self {
        Filter::Only(changes.into_iter().collect())
    }

    /// Check whether a change passes this filter
    #[inline]
    pub fn matches(&self, change: Change) -> bool {
        match self {
            Filter::Any => true,
            Filter::Only(set) => set.contains(&change),
        }
    }
}

impl From<Change> for Filter {
    fn from(change: Change) -> Self {
        Filter::only([change])
    }
}

impl FromStr for Filter {
    type Err = String;

    /// Parses `any` or a comma-separated list of change names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("any") {
            return Ok(Filter::Any);
        }
        s.split(',')
            .map(|part| part.trim().parse::<Change>())
            .collect::<Result<HashSet<_>, _>>()
            .map(Filter::Only)
    }
}
