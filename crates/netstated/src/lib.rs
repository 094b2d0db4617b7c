//! Interface Operational State Watcher
//!
//! Observes link operational state transitions reported by the kernel over
//! route netlink (RTM_NEWLINK/RTM_DELLINK on RTMGRP_LINK) and republishes them
//! as [`Change`] events to any number of independently filtered subscribers.
//!
//! NIST 800-53 Rev5 [SI-4]: System Monitoring - Real-time link state monitoring
//! NIST 800-53 Rev5 [SC-7]: Boundary Protection - Kernel interface boundary
//!
//! # Example
//!
//! ```no_run
//! use sonic_netstated::{Change, Filter, Watcher};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> sonic_netstated::Result<()> {
//! let watcher = Arc::new(Watcher::new());
//! let mut downs = watcher.subscribe("Ethernet0", Change::Down);
//! let mut all = watcher.subscribe("Ethernet4", Filter::Any);
//!
//! let cancel = CancellationToken::new();
//! let task = tokio::spawn({
//!     let watcher = watcher.clone();
//!     let cancel = cancel.clone();
//!     async move { watcher.watch(cancel).await }
//! });
//!
//! while let Some(change) = downs.recv().await {
//!     println!("Ethernet0 went {}", change);
//! #   break;
//! }
//! # let _ = all.try_recv();
//! cancel.cancel();
//! task.await.expect("watch task panicked")?;
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod change_set;
pub mod config_file;
pub mod error;
pub mod netlink;
pub mod registry;
pub mod source;
pub mod watcher;

pub use change::{Change, Filter, oper_state_change};
pub use change_set::ChangeSet;
pub use config_file::{LoggingConfig, NetstatedConfig, SubscriptionConfig, WatcherConfig};
pub use error::{Result, WatchError};
pub use netlink::{PlatformDialer, UnsupportedDialer, platform_dialer};
pub use registry::{Subscription, SubscriptionId, SubscriptionRegistry};
pub use source::{Dialer, LinkNotification, NotificationSource, RTMGRP_LINK, RouteMessage};
pub use watcher::Watcher;

#[cfg(target_os = "linux")]
pub use netlink::{NetlinkDialer, RouteSocket};
