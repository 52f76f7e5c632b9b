//! Filesystem watcher adapter.
//!
//! Wraps a native `notify` watcher, subscribes every directory under the
//! served root one by one, and hands out [`ChangeEvent`]s through
//! [`ChangeSource`]. Directories created later are subscribed when their
//! `Create` event passes through [`DirWatcher::next_change`].

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Write,
    Create,
    Remove,
    Rename,
    MetadataOnly,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Create => "create",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::MetadataOnly => "metadata",
        }
    }
}

/// One change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self { path: path.into(), kind }
    }
}

/// A lazy, endless stream of filesystem changes.
///
/// `None` means the underlying subscription is gone and no further events
/// will arrive. `Some(Err(_))` is a reported but recoverable watcher error.
pub trait ChangeSource: Send {
    fn next_change(&mut self) -> impl Future<Output = Option<notify::Result<ChangeEvent>>> + Send;
}

/// Translate a raw `notify` event into per-path changes.
///
/// Access events and events of unknown kind carry no content change and are
/// dropped. A rename onto a watched path is reported as `Create` for the
/// destination, since from the page's point of view a new file appeared.
pub fn translate(event: notify::Event) -> Vec<ChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Create,
        EventKind::Remove(_) => ChangeKind::Remove,
        EventKind::Modify(ModifyKind::Metadata(_)) => ChangeKind::MetadataOnly,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths are [from, to]
            let mut paths = event.paths.into_iter();
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                out.push(ChangeEvent::new(from, ChangeKind::Rename));
            }
            out.extend(paths.map(|to| ChangeEvent::new(to, ChangeKind::Create)));
            return out;
        }
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Rename,
        EventKind::Modify(_) => ChangeKind::Write,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event.paths.into_iter().map(|path| ChangeEvent::new(path, kind)).collect()
}

/// Native watcher over every directory below a root.
pub struct DirWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    pending: VecDeque<ChangeEvent>,
    watched: usize,
}

impl DirWatcher {
    /// Create the native watcher and subscribe `root` and all of its
    /// subdirectories.
    ///
    /// Fails if the watcher cannot be created, the root cannot be watched,
    /// or the OS watch limit is exhausted part way through the walk.
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // Receiver gone means the watch loop ended; nothing to do.
            let _ = tx.send(res);
        })?;

        watcher.watch(root, RecursiveMode::NonRecursive)?;
        let watched = 1 + subscribe_subdirs(&mut watcher, root)?;
        debug!(root = %root.display(), dirs = watched, "watching directory tree");

        Ok(Self { watcher, rx, pending: VecDeque::new(), watched })
    }

    /// Number of directories currently subscribed.
    pub fn watched_dirs(&self) -> usize {
        self.watched
    }

    async fn next(&mut self) -> Option<notify::Result<ChangeEvent>> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                return Some(Ok(change));
            }

            let event = match self.rx.recv().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(e)),
            };

            for change in translate(event) {
                if change.kind == ChangeKind::Create && change.path.is_dir() {
                    self.subscribe_new_dir(&change.path);
                }
                self.pending.push_back(change);
            }
        }
    }

    fn subscribe_new_dir(&mut self, dir: &Path) {
        match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => self.watched += 1,
            Err(e) => {
                warn!(dir = %dir.display(), "cannot watch new directory: {e}");
                return;
            }
        }
        // Anything created inside before the watch was attached.
        match subscribe_subdirs(&mut self.watcher, dir) {
            Ok(n) => self.watched += n,
            Err(e) => warn!(dir = %dir.display(), "cannot watch new subdirectories: {e}"),
        }
        debug!(dir = %dir.display(), "watching new directory");
    }
}

impl ChangeSource for DirWatcher {
    fn next_change(&mut self) -> impl Future<Output = Option<notify::Result<ChangeEvent>>> + Send {
        self.next()
    }
}

/// Subscribe every directory strictly below `dir`. Unreadable entries are
/// skipped; running out of watch descriptors aborts.
fn subscribe_subdirs(watcher: &mut RecommendedWatcher, dir: &Path) -> notify::Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(dir).min_depth(1).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        match watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
            Ok(()) => count += 1,
            Err(e) if matches!(e.kind, notify::ErrorKind::MaxFilesWatch) => return Err(e),
            Err(e) => warn!(dir = %entry.path().display(), "cannot watch directory: {e}"),
        }
    }
    Ok(count)
}
