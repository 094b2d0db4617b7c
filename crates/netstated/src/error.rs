//! Error types for netstated
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types naming the failed operation

use std::io;
use thiserror::Error;

/// Errors surfaced by the link state watcher
///
/// Every fatal condition of the watch loop is returned through one of these
/// variants. The socket is already closed by the time a caller observes it.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The notification source could not be opened (or is unsupported here)
    #[error("netstate: watcher failed to dial route netlink: {0}")]
    Dial(#[source] io::Error),

    /// A receive failed while no cancellation was requested
    #[error("netstate: watcher failed to listen for route netlink messages: {0}")]
    Receive(#[source] io::Error),

    /// The read deadline could not be forced during shutdown
    #[error("netstate: failed to interrupt watcher: {0}")]
    Interrupt(#[source] io::Error),

    /// The cancellation observer task panicked or was aborted
    #[error("netstate: cancellation observer failed: {0}")]
    Observer(#[from] tokio::task::JoinError),

    /// `watch` was called while another watch loop owns this Watcher
    #[error("netstate: watcher is already running")]
    AlreadyRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WatchError {
    /// Returns true if the platform has no link notification facility
    pub fn is_unsupported(&self) -> bool {
        matches!(self, WatchError::Dial(e) if e.kind() == io::ErrorKind::Unsupported)
    }
}

/// Result type for netstated operations
pub type Result<T> = std::result::Result<T, WatchError>;
