//! Notification source contract consumed by the watch loop
//!
//! A source is a kernel multicast channel that yields batches of raw route
//! messages. It must support forcing a blocked receive to time out, which is
//! the only way the watch loop gets interrupted on cancellation.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel interface boundary

use async_trait::async_trait;
use std::io;
use tokio::time::Instant;

/// Netlink multicast group for link notifications (RTMGRP_LINK)
pub const RTMGRP_LINK: u32 = 0x1;

/// Link attributes consumed by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNotification {
    /// Interface name (IFLA_IFNAME)
    pub name: String,
    /// Raw operational state code (IFLA_OPERSTATE)
    pub oper_state: u8,
}

impl LinkNotification {
    pub fn new(name: impl Into<String>, oper_state: u8) -> Self {
        Self {
            name: name.into(),
            oper_state,
        }
    }
}

/// A single decoded route netlink message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMessage {
    /// RTM_NEWLINK or RTM_DELLINK
    Link(LinkNotification),
    /// Anything else (addresses, routes, control messages); ignored
    Other,
}

/// A deadline that has already elapsed, forcing any pending read to time out
pub fn deadline_now() -> Instant {
    Instant::now()
}

/// An open notification channel
///
/// Dropping the source closes it.
#[async_trait]
pub trait NotificationSource: Send + Sync + 'static {
    /// Wait for the next batch of messages
    ///
    /// Returns an error of kind [`io::ErrorKind::TimedOut`] once the read
    /// deadline has passed, including when it moves into the past while the
    /// call is parked.
    async fn receive(&self) -> io::Result<Vec<RouteMessage>>;

    /// Set the read deadline applied to current and future receives
    fn set_read_deadline(&self, deadline: Instant) -> io::Result<()>;
}

/// Strategy for opening a notification source
pub trait Dialer: Send + Sync {
    type Source: NotificationSource;

    /// Open a source subscribed to the given multicast groups
    fn dial(&self, groups: u32) -> io::Result<Self::Source>;
}

/// Returns true if the error was caused by an expired read deadline
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_notification_new() {
        let link = LinkNotification::new("eth0", 6);
        assert_eq!(link.name, "eth0");
        assert_eq!(link.oper_state, 6);
    }

    #[test]
    fn test_is_timeout() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[tokio::test]
    async fn test_deadline_now_has_elapsed() {
        let deadline = deadline_now();
        assert!(deadline <= Instant::now());
    }
}
