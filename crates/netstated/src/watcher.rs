//! Watcher - the link state watch loop
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Continuous link state monitoring
//! - AU-12: Audit Record Generation - Watch lifecycle is logged
//!
//! The loop owns the notification source exclusively. A blocked kernel read
//! cannot be cancelled directly, so a short-lived observer task turns the
//! caller's cancellation into an already-elapsed read deadline. When a
//! receive fails, the loop checks whether cancellation has fired before
//! deciding if the failure is its own doing or a real transport error.

use crate::change::Filter;
use crate::change_set::ChangeSet;
use crate::config_file::WatcherConfig;
use crate::error::{Result, WatchError};
use crate::netlink::platform_dialer;
use crate::registry::{Subscription, SubscriptionId, SubscriptionRegistry};
use crate::source::{Dialer, NotificationSource, RTMGRP_LINK, deadline_now, is_timeout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Publishes kernel link state changes to filtered subscribers
///
/// Constructing a Watcher has no side effects; the socket is opened by
/// [`Watcher::watch`] and closed before it returns. Subscriptions may be
/// added before or while a watch is running.
pub struct Watcher {
    config: WatcherConfig,
    registry: Arc<SubscriptionRegistry>,
    running: AtomicBool,
}

/// Clears the running flag when a watch loop exits by any path
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Watcher {
    /// Create a Watcher with default configuration
    pub fn new() -> Self {
        Self::with_config(WatcherConfig::default())
    }

    /// Create a Watcher with explicit configuration
    pub fn with_config(config: WatcherConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(config.subscriber_capacity));
        Self {
            config,
            registry,
            running: AtomicBool::new(false),
        }
    }

    /// Configuration this Watcher was built with
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Register interest in changes for an interface
    ///
    /// Returns immediately. Changes are only produced while a watch loop is
    /// running.
    pub fn subscribe(
        &self,
        interface: impl Into<String>,
        filter: impl Into<Filter>,
    ) -> Subscription {
        self.registry.subscribe(interface, filter.into())
    }

    /// Remove a subscription; its receiver sees the end of the stream
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Number of registered subscriptions
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether a watch loop currently owns this Watcher
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Watch kernel link notifications until `cancel` fires
    ///
    /// Returns `Ok(())` on graceful cancellation. On platforms without route
    /// netlink this fails immediately with a [`WatchError::Dial`] for which
    /// [`WatchError::is_unsupported`] is true.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let dialer = platform_dialer(
            self.config.receive_buffer_size,
            self.config.socket_receive_buffer,
        );
        self.watch_with(&dialer, cancel).await
    }

    /// Watch using an explicit notification source strategy
    #[instrument(skip_all)]
    pub async fn watch_with<D: Dialer>(
        &self,
        dialer: &D,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(WatchError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let source = Arc::new(dialer.dial(RTMGRP_LINK).map_err(|e| {
            warn!(error = %e, "Failed to dial route netlink");
            WatchError::Dial(e)
        })?);

        info!("Watching link state changes");

        // Releases the observer's handle on the source even if this future
        // is dropped before the loop returns.
        let done = CancellationToken::new();
        let _done_guard = done.clone().drop_guard();
        let observer = tokio::spawn(observe_cancellation(
            Arc::clone(&source),
            cancel.clone(),
            done.clone(),
        ));

        let result = self.run(&*source, &cancel, observer, &done).await;

        // Close the socket before reporting the outcome.
        drop(source);

        match &result {
            Ok(()) => info!("Stopped watching link state changes"),
            Err(e) => warn!(error = %e, "Link state watcher failed"),
        }
        result
    }

    async fn run<S: NotificationSource>(
        &self,
        source: &S,
        cancel: &CancellationToken,
        observer: JoinHandle<Result<()>>,
        done: &CancellationToken,
    ) -> Result<()> {
        loop {
            let err = match source.receive().await {
                Ok(msgs) => {
                    let changes = ChangeSet::from_messages(&msgs);
                    debug!(
                        messages = msgs.len(),
                        interfaces = changes.len(),
                        changes = changes.change_count(),
                        "Processing link batch"
                    );
                    self.registry.notify(&changes).await;
                    continue;
                }
                Err(err) => err,
            };

            if cancel.is_cancelled() {
                // Expected: the observer forced this receive to time out.
                if !is_timeout(&err) {
                    debug!(error = %err, "Receive failed after cancellation");
                }
                return observer.await?;
            }

            done.cancel();
            // The receive error takes precedence over anything the observer
            // reports while stopping.
            let _ = observer.await;
            return Err(WatchError::Receive(err));
        }
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridge cancellation into a forced read timeout
///
/// Exits without touching the source if the loop finishes first or the
/// watch future is dropped.
async fn observe_cancellation<S: NotificationSource>(
    source: Arc<S>,
    cancel: CancellationToken,
    done: CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = done.cancelled() => return Ok(()),
    }

    debug!("Cancellation requested, interrupting receive");
    source
        .set_read_deadline(deadline_now())
        .map_err(WatchError::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Change, IF_OPER_DOWN, IF_OPER_UP};
    use crate::source::{LinkNotification, RouteMessage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::{Instant, timeout};

    /// Replays scripted batches, then parks until the deadline is forced
    struct ScriptedSource {
        batches: Mutex<VecDeque<io::Result<Vec<RouteMessage>>>>,
        interrupted: AtomicBool,
        wake: Notify,
        fail_interrupt: bool,
        closed: Arc<AtomicBool>,
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl NotificationSource for ScriptedSource {
        async fn receive(&self) -> io::Result<Vec<RouteMessage>> {
            loop {
                if self.interrupted.load(Ordering::Acquire) {
                    return Err(io::Error::from(io::ErrorKind::TimedOut));
                }
                if let Some(batch) = self.batches.lock().pop_front() {
                    return batch;
                }
                let notified = self.wake.notified();
                if self.interrupted.load(Ordering::Acquire) {
                    continue;
                }
                notified.await;
            }
        }

        fn set_read_deadline(&self, deadline: Instant) -> io::Result<()> {
            if self.fail_interrupt {
                return Err(io::Error::other("deadline rejected"));
            }
            if deadline <= Instant::now() {
                self.interrupted.store(true, Ordering::Release);
                self.wake.notify_waiters();
            }
            Ok(())
        }
    }

    struct ScriptedDialer {
        batches: Mutex<Option<Vec<io::Result<Vec<RouteMessage>>>>>,
        fail_interrupt: bool,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedDialer {
        fn new(batches: Vec<io::Result<Vec<RouteMessage>>>) -> Self {
            Self {
                batches: Mutex::new(Some(batches)),
                fail_interrupt: false,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Dialer for ScriptedDialer {
        type Source = ScriptedSource;

        fn dial(&self, groups: u32) -> io::Result<ScriptedSource> {
            assert_eq!(groups, RTMGRP_LINK);
            let batches = self.batches.lock().take().unwrap_or_default();
            Ok(ScriptedSource {
                batches: Mutex::new(batches.into()),
                interrupted: AtomicBool::new(false),
                wake: Notify::new(),
                fail_interrupt: self.fail_interrupt,
                closed: Arc::clone(&self.closed),
            })
        }
    }

    struct FailingDialer;

    impl Dialer for FailingDialer {
        type Source = ScriptedSource;

        fn dial(&self, _groups: u32) -> io::Result<ScriptedSource> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    fn link(name: &str, code: u8) -> RouteMessage {
        RouteMessage::Link(LinkNotification::new(name, code))
    }

    #[tokio::test]
    async fn test_cancel_returns_ok() {
        let watcher = Watcher::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let dialer = ScriptedDialer::new(vec![]);
        let result = timeout(Duration::from_secs(5), watcher.watch_with(&dialer, cancel)).await;
        assert!(matches!(result, Ok(Ok(()))));
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let watcher = Watcher::new();
        let err = watcher
            .watch_with(&FailingDialer, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Dial(_)));
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_transport_failure_without_cancel() {
        let watcher = Watcher::new();
        let dialer = ScriptedDialer::new(vec![Err(io::Error::from(
            io::ErrorKind::ConnectionReset,
        ))]);

        let err = watcher
            .watch_with(&dialer, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            WatchError::Receive(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_interrupt_failure_is_reported() {
        let watcher = Watcher::new();
        let mut dialer = ScriptedDialer::new(vec![Err(io::Error::from(
            io::ErrorKind::TimedOut,
        ))]);
        dialer.fail_interrupt = true;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = watcher.watch_with(&dialer, cancel).await.unwrap_err();
        assert!(matches!(err, WatchError::Interrupt(_)));
    }

    #[tokio::test]
    async fn test_batches_are_delivered_then_cancel() {
        let watcher = Arc::new(Watcher::new());
        let mut sub = watcher.subscribe("dummy0", Filter::Any);

        let dialer = ScriptedDialer::new(vec![
            Ok(vec![link("dummy0", IF_OPER_UP), link("dummy1", IF_OPER_DOWN)]),
            Ok(vec![RouteMessage::Other]),
            Ok(vec![link("dummy0", IF_OPER_DOWN)]),
        ]);

        let cancel = CancellationToken::new();
        let handle = {
            let watcher = watcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { watcher.watch_with(&dialer, cancel).await })
        };

        assert_eq!(sub.recv().await, Some(Change::Up));
        assert_eq!(sub.recv().await, Some(Change::Down));

        cancel.cancel();
        let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_watch_future_closes_source() {
        let watcher = Watcher::new();
        let dialer = ScriptedDialer::new(vec![]);
        let cancel = CancellationToken::new();

        // The caller gives up on the watch without ever cancelling it.
        let result = timeout(
            Duration::from_millis(50),
            watcher.watch_with(&dialer, cancel.clone()),
        )
        .await;
        assert!(result.is_err());
        assert!(!watcher.is_running());

        let closed = timeout(Duration::from_secs(5), async {
            while !dialer.closed.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(closed.is_ok(), "source still open after watch was dropped");
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_source_closed_before_watch_returns() {
        let watcher = Watcher::new();
        let dialer = ScriptedDialer::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        watcher.watch_with(&dialer, cancel).await.unwrap();
        assert!(dialer.closed.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_second_watch_is_rejected() {
        let watcher = Arc::new(Watcher::new());
        let cancel = CancellationToken::new();

        let handle = {
            let watcher = watcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                watcher
                    .watch_with(&ScriptedDialer::new(vec![]), cancel)
                    .await
            })
        };

        while !watcher.is_running() {
            tokio::task::yield_now().await;
        }

        let err = watcher
            .watch_with(&ScriptedDialer::new(vec![]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::AlreadyRunning));

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let watcher = Watcher::new();
        let sub = watcher.subscribe("eth0", Change::Down);
        assert_eq!(watcher.subscription_count(), 1);
        assert!(watcher.unsubscribe(sub.id()));
        assert_eq!(watcher.subscription_count(), 0);
    }
}
