//! Turns filesystem changes into reload broadcasts.
//!
//! Only content writes and creations count. Accepted changes open a burst
//! that is flushed as a single reload once the tree has been quiet for the
//! debounce window, or once the burst has lasted [`MAX_BURST_WINDOWS`]
//! windows, whichever comes first. A zero window broadcasts per change.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::watcher::{ChangeEvent, ChangeKind, ChangeSource};

/// A burst never holds a reload back longer than this many windows.
pub const MAX_BURST_WINDOWS: u32 = 4;

/// Counters returned when the watch loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: usize,
    pub broadcasts: usize,
}

/// Whether a change should reload connected pages.
pub fn triggers_reload(change: &ChangeEvent) -> bool {
    matches!(change.kind, ChangeKind::Write | ChangeKind::Create)
        && !is_editor_artifact(&change.path)
}

/// Swap, backup and probe files that editors write next to the real file.
fn is_editor_artifact(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "swp" | "swo" | "swx" | "tmp" | "bak")
        || name.ends_with('~')
        || name == "4913"
}

struct Burst {
    first: Instant,
    last: Instant,
}

impl Burst {
    fn deadline(&self, window: Duration) -> Instant {
        (self.last + window).min(self.first + window * MAX_BURST_WINDOWS)
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Watch loop driving the [`Broadcaster`].
pub struct Dispatcher {
    broadcaster: Arc<Broadcaster>,
    debounce: Duration,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(broadcaster: Arc<Broadcaster>, debounce: Duration) -> Self {
        Self { broadcaster, debounce, stats: DispatchStats::default() }
    }

    /// Consume `source` until it ends.
    ///
    /// Watcher errors are logged and skipped. When the source is exhausted
    /// any pending burst is flushed and the loop returns; static serving is
    /// unaffected.
    pub async fn run<S: ChangeSource>(mut self, mut source: S) -> DispatchStats {
        let mut burst: Option<Burst> = None;

        loop {
            let deadline = burst.as_ref().map(|b| b.deadline(self.debounce));

            tokio::select! {
                item = source.next_change() => match item {
                    Some(Ok(change)) => self.on_change(change, &mut burst),
                    Some(Err(e)) => warn!("watcher error: {e}"),
                    None => {
                        if burst.take().is_some() {
                            self.flush();
                        }
                        error!("file watcher stopped; live reload disabled");
                        return self.stats;
                    }
                },
                () = wait_until(deadline) => {
                    burst = None;
                    self.flush();
                }
            }
        }
    }

    fn on_change(&mut self, change: ChangeEvent, burst: &mut Option<Burst>) {
        if !triggers_reload(&change) {
            debug!(path = %change.path.display(), kind = change.kind.label(), "ignored change");
            return;
        }

        info!(path = %change.path.display(), kind = change.kind.label(), "change detected");
        self.stats.accepted += 1;

        if self.debounce.is_zero() {
            self.flush();
            return;
        }

        let now = Instant::now();
        match burst {
            Some(b) => b.last = now,
            None => *burst = Some(Burst { first: now, last: now }),
        }
    }

    fn flush(&mut self) {
        let report = self.broadcaster.broadcast_reload();
        self.stats.broadcasts += 1;
        debug!(delivered = report.delivered, pruned = report.pruned, "reload broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Signal;
    use std::future::Future;
    use tokio::sync::mpsc;

    /// Change source fed by hand.
    struct Feed(mpsc::UnboundedReceiver<notify::Result<ChangeEvent>>);

    impl ChangeSource for Feed {
        fn next_change(
            &mut self,
        ) -> impl Future<Output = Option<notify::Result<ChangeEvent>>> + Send {
            self.0.recv()
        }
    }

    fn feed() -> (mpsc::UnboundedSender<notify::Result<ChangeEvent>>, Feed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Feed(rx))
    }

    fn write(path: &str) -> notify::Result<ChangeEvent> {
        Ok(ChangeEvent::new(path, ChangeKind::Write))
    }

    #[test]
    fn filter_accepts_writes_and_creates() {
        assert!(triggers_reload(&ChangeEvent::new("/s/index.html", ChangeKind::Write)));
        assert!(triggers_reload(&ChangeEvent::new("/s/new.css", ChangeKind::Create)));
        assert!(!triggers_reload(&ChangeEvent::new("/s/index.html", ChangeKind::MetadataOnly)));
        assert!(!triggers_reload(&ChangeEvent::new("/s/index.html", ChangeKind::Remove)));
        assert!(!triggers_reload(&ChangeEvent::new("/s/index.html", ChangeKind::Rename)));
    }

    #[test]
    fn filter_skips_editor_artifacts() {
        for name in ["/s/.index.html.swp", "/s/index.html~", "/s/4913", "/s/x.tmp"] {
            assert!(!triggers_reload(&ChangeEvent::new(name, ChangeKind::Write)), "{name}");
        }
    }

    #[tokio::test]
    async fn zero_window_broadcasts_each_change() {
        let hub = Arc::new(Broadcaster::new(16));
        let mut client = hub.register();
        let (tx, source) = feed();

        for _ in 0..3 {
            tx.send(write("/s/index.html")).unwrap();
        }
        drop(tx);

        let stats = Dispatcher::new(Arc::clone(&hub), Duration::ZERO).run(source).await;
        assert_eq!(stats, DispatchStats { accepted: 3, broadcasts: 3 });
        for _ in 0..3 {
            assert_eq!(client.recv().await, Some(Signal::Reload));
        }
    }

    #[tokio::test]
    async fn burst_is_coalesced() {
        let hub = Arc::new(Broadcaster::new(16));
        let (tx, source) = feed();
        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&hub), Duration::from_millis(50)).run(source),
        );

        for _ in 0..5 {
            tx.send(write("/s/index.html")).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(tx);

        let stats = task.await.unwrap();
        assert_eq!(stats, DispatchStats { accepted: 5, broadcasts: 1 });
    }

    #[tokio::test]
    async fn ignored_changes_do_not_broadcast() {
        let hub = Arc::new(Broadcaster::default());
        let (tx, source) = feed();
        tx.send(Ok(ChangeEvent::new("/s/index.html", ChangeKind::MetadataOnly))).unwrap();
        tx.send(Ok(ChangeEvent::new("/s/old.css", ChangeKind::Remove))).unwrap();
        drop(tx);

        let stats = Dispatcher::new(hub, Duration::from_millis(10)).run(source).await;
        assert_eq!(stats, DispatchStats::default());
    }

    #[tokio::test]
    async fn watcher_errors_do_not_stop_the_loop() {
        let hub = Arc::new(Broadcaster::default());
        let (tx, source) = feed();
        tx.send(Err(notify::Error::generic("queue overflow"))).unwrap();
        tx.send(write("/s/index.html")).unwrap();
        drop(tx);

        let stats = Dispatcher::new(hub, Duration::ZERO).run(source).await;
        assert_eq!(stats.broadcasts, 1);
    }

    #[tokio::test]
    async fn pending_burst_flushes_when_source_ends() {
        let hub = Arc::new(Broadcaster::default());
        let (tx, source) = feed();
        tx.send(write("/s/index.html")).unwrap();
        drop(tx);

        let stats = Dispatcher::new(hub, Duration::from_secs(1)).run(source).await;
        assert_eq!(stats.broadcasts, 1);
    }

    #[tokio::test]
    async fn idle_loop_waits_without_broadcasting() {
        let hub = Arc::new(Broadcaster::default());
        let (tx, source) = feed();
        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&hub), Duration::from_millis(20)).run(source),
        );

        // Nothing pending: the timer branch must stay quiet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(write("/s/index.html")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);

        let stats = task.await.unwrap();
        assert_eq!(stats, DispatchStats { accepted: 1, broadcasts: 1 });
    }

    #[tokio::test]
    async fn steady_stream_still_reloads() {
        let hub = Arc::new(Broadcaster::new(64));
        let (tx, source) = feed();
        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&hub), Duration::from_millis(50)).run(source),
        );

        // A change every 20ms never leaves a 50ms quiet gap.
        for _ in 0..25 {
            tx.send(write("/s/app.js")).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        drop(tx);

        let stats = task.await.unwrap();
        assert!(stats.broadcasts >= 2, "{stats:?}");
    }
}
