//! Watch engine: turns notifications into mirror actions.
//!
//! ```text
//! NotificationSource ──► bounded queue ──► dispatcher ──► worker[hash(dest) % n]
//!                                             │                   │
//!                                    filter directories    materialize / retire
//! ```
//!
//! Every action for a given destination path is routed to the same worker,
//! so two actions on one path never run concurrently and keep their delivery
//! order. Actions on different paths may run in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_QUEUE_CAPACITY, MirrorConfig};
use crate::error::{MirrorError, Result};
use crate::event::{FileEvent, FileEventKind};
use crate::logger::{ActionLog, EventLogger};
use crate::mapper::{PathMapping, normalize};
use crate::source::{EventSink, NotificationSource, NotifySource, SourceSignal};
use crate::transform::FileTransformer;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting and applying events.
    Running,

    /// Not attached. Initial and terminal.
    Stopped,
}

/// A configured, not yet started, mirror of one source tree.
pub struct WatchSession {
    source_root: PathBuf,
    dest_root: PathBuf,
    transformer: Arc<dyn FileTransformer>,
    logger: Arc<dyn EventLogger>,
    enable_logging: bool,
    workers: usize,
    queue_capacity: usize,
}

impl WatchSession {
    /// Create a session. Both roots are normalized to absolute paths here and
    /// stay fixed for the session's lifetime.
    pub fn new(
        source_root: impl AsRef<Path>,
        dest_root: impl AsRef<Path>,
        transformer: Arc<dyn FileTransformer>,
        logger: Arc<dyn EventLogger>,
    ) -> Result<Self> {
        Ok(Self {
            source_root: normalize(source_root.as_ref())?,
            dest_root: normalize(dest_root.as_ref())?,
            transformer,
            logger,
            enable_logging: true,
            workers: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        })
    }

    /// Create a session from a validated config.
    pub fn from_config(
        config: &MirrorConfig,
        transformer: Arc<dyn FileTransformer>,
        logger: Arc<dyn EventLogger>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(&config.source_root, &config.dest_root, transformer, logger)?
            .with_workers(config.workers)
            .with_queue_capacity(config.queue_capacity)
            .with_logging(config.enable_logging))
    }

    /// Set the number of workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the capacity of the notification and worker queues (at least one).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Enable or disable the audit log.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Normalized source root.
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Normalized destination root.
    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    /// Start watching with the platform's native notification backend.
    pub async fn start(self) -> Result<WatchHandle> {
        self.start_with(NotifySource::new()).await
    }

    /// Start watching with the given notification source.
    pub async fn start_with<S>(self, mut source: S) -> Result<WatchHandle>
    where
        S: NotificationSource + 'static,
    {
        check_root(&self.source_root)?;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        source.attach(&self.source_root, EventSink::new(tx))?;

        let log = ActionLog::new(self.logger, self.enable_logging);
        log.log("Monitor drive started");
        log.log(&format!(
            "Processing folders: from:{} to:{}",
            self.source_root.display(),
            self.dest_root.display()
        ));

        let stats = Arc::new(MirrorStats::default());
        let actions = Arc::new(Actions {
            transformer: self.transformer,
            log,
            stats: stats.clone(),
        });

        let mut routes = Vec::with_capacity(self.workers);
        let mut workers = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let (worker_tx, worker_rx) = mpsc::channel(self.queue_capacity);
            routes.push(worker_tx);
            workers.push(tokio::spawn(run_worker(id, worker_rx, actions.clone())));
        }

        let state = Arc::new(RwLock::new(SessionState::Running));
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher {
            source_root: self.source_root.clone(),
            dest_root: self.dest_root.clone(),
            rx,
            routes,
            workers,
            actions,
            cancel: cancel.clone(),
            state: state.clone(),
        };

        info!(
            "Mirroring {} into {} with {} worker(s)",
            self.source_root.display(),
            self.dest_root.display(),
            self.workers
        );

        Ok(WatchHandle {
            source_root: self.source_root,
            dest_root: self.dest_root,
            source: Some(Box::new(source)),
            dispatcher: Some(tokio::spawn(dispatcher.run())),
            cancel,
            state,
            stats,
        })
    }
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("source_root", &self.source_root)
            .field("dest_root", &self.dest_root)
            .field("transformer", &self.transformer.name())
            .field("enable_logging", &self.enable_logging)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

fn check_root(root: &Path) -> Result<()> {
    let setup_error = |reason: String| MirrorError::WatchSetup {
        path: root.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(root).map_err(|e| setup_error(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(setup_error("not a directory".to_string()));
    }
    std::fs::read_dir(root).map_err(|e| setup_error(format!("not readable: {e}")))?;
    Ok(())
}

/// A running session.
///
/// Dropping the handle releases the subscription and stops the event loop
/// without waiting for in-flight actions.
pub struct WatchHandle {
    source_root: PathBuf,
    dest_root: PathBuf,
    source: Option<Box<dyn NotificationSource>>,
    dispatcher: Option<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<MirrorStats>,
}

impl WatchHandle {
    /// Stop accepting events, let accepted ones finish, and release the
    /// subscription.
    ///
    /// Returns the session's error if it had already failed.
    pub async fn stop(mut self) -> Result<SessionSummary> {
        self.cancel.cancel();
        // The event loop closes the queue before exiting, which unblocks a
        // source parked on a full queue. Detach only after that.
        let result = self.join().await;
        self.release().await;
        result?;
        info!("Stopped watching {}", self.source_root.display());
        Ok(self.stats.snapshot())
    }

    /// Wait until the session ends on its own, which only happens when the
    /// notification source fails.
    ///
    /// Cancel safe: dropping the returned future leaves the session running,
    /// and a later [`WatchHandle::stop`] still waits for accepted events.
    pub async fn stopped(&mut self) -> Result<()> {
        let result = self.join().await;
        self.release().await;
        result
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Check if the session is running.
    pub async fn is_running(&self) -> bool {
        self.state().await == SessionState::Running
    }

    /// Live counters.
    pub fn stats(&self) -> SessionSummary {
        self.stats.snapshot()
    }

    /// Normalized source root.
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Normalized destination root.
    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    async fn join(&mut self) -> Result<()> {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return Ok(());
        };
        let joined = dispatcher.await;
        self.dispatcher = None;
        match joined {
            Ok(result) => result,
            Err(e) => {
                *self.state.write().await = SessionState::Stopped;
                Err(MirrorError::NotificationSource(format!(
                    "event loop terminated: {e}"
                )))
            }
        }
    }

    /// Detach the source off the runtime's worker threads.
    async fn release(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || source.detach()).await {
            warn!("Releasing watch on {} failed: {e}", self.source_root.display());
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        let Some(mut source) = self.source.take() else {
            return;
        };
        // Detaching can wait on the backend thread, which may itself be
        // waiting for the event loop to close the queue.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || source.detach());
            }
            Err(_) => source.detach(),
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("source_root", &self.source_root)
            .field("dest_root", &self.dest_root)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// A routed unit of work.
#[derive(Debug)]
struct Job {
    kind: FileEventKind,
    mapping: PathMapping,
}

struct Dispatcher {
    source_root: PathBuf,
    dest_root: PathBuf,
    rx: mpsc::Receiver<SourceSignal>,
    routes: Vec<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    actions: Arc<Actions>,
    cancel: CancellationToken,
    state: Arc<RwLock<SessionState>>,
}

impl Dispatcher {
    async fn run(mut self) -> Result<()> {
        let result = self.pump().await;

        // Closing the routes lets each worker finish what it already holds.
        self.routes.clear();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Worker terminated abnormally: {e}");
            }
        }
        *self.state.write().await = SessionState::Stopped;

        if let Err(ref e) = result {
            error!("Watch on {} failed: {e}", self.source_root.display());
            self.actions.log.log(&format!("watch stopped: {e}"));
        }
        result
    }

    async fn pump(&mut self) -> Result<()> {
        let mut closing = false;
        loop {
            let signal = tokio::select! {
                _ = self.cancel.cancelled(), if !closing => {
                    // No new events; drain what is already queued.
                    self.rx.close();
                    closing = true;
                    continue;
                }
                signal = self.rx.recv() => signal,
            };

            match signal {
                Some(SourceSignal::Event(event)) => self.dispatch(event).await?,
                Some(SourceSignal::Failed(reason)) => {
                    return Err(MirrorError::NotificationSource(reason));
                }
                None if closing => return Ok(()),
                None => {
                    return Err(MirrorError::NotificationSource(
                        "notification stream closed".to_string(),
                    ));
                }
            }
        }
    }

    async fn dispatch(&mut self, event: FileEvent) -> Result<()> {
        if event.kind.is_departure() && event.path == self.source_root {
            return Err(MirrorError::NotificationSource(format!(
                "source root {} was removed",
                self.source_root.display()
            )));
        }

        if event.is_directory() {
            self.actions.stats.directories_ignored.fetch_add(1, Ordering::Relaxed);
            debug!("Ignoring directory event {:?} for {}", event.kind, event.path.display());
            return Ok(());
        }

        let mapping = match PathMapping::resolve(&self.source_root, &self.dest_root, &event.path) {
            Ok(mapping) => mapping,
            Err(e) => {
                self.actions.record_failure(&e);
                return Ok(());
            }
        };

        let worker = route(&mapping.dest, self.routes.len());
        debug!(
            "Routing {:?} for {} to worker {worker}",
            event.kind,
            mapping.source.display()
        );
        let job = Job {
            kind: event.kind,
            mapping,
        };
        if self.routes[worker].send(job).await.is_err() {
            return Err(MirrorError::NotificationSource(format!(
                "worker {worker} is no longer running"
            )));
        }
        Ok(())
    }
}

/// Pick the worker owning `dest`.
fn route(dest: &Path, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    dest.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn run_worker(id: usize, mut rx: mpsc::Receiver<Job>, actions: Arc<Actions>) {
    while let Some(job) = rx.recv().await {
        let source = job.mapping.source.clone();
        let task_actions = actions.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || task_actions.apply(job)).await {
            actions.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("Worker {id}: action for {} aborted: {e}", source.display());
            actions
                .log
                .log(&format!("processing aborted: from:{} error:{e}", source.display()));
        }
    }
    debug!("Worker {id} drained");
}

/// Materialize and retire, shared by all workers.
struct Actions {
    transformer: Arc<dyn FileTransformer>,
    log: ActionLog,
    stats: Arc<MirrorStats>,
}

impl Actions {
    fn apply(&self, job: Job) {
        if job.kind.is_arrival() {
            self.materialize(&job.mapping);
        } else {
            self.retire(&job.mapping);
        }
    }

    fn materialize(&self, mapping: &PathMapping) {
        if let Err(e) = ensure_parent_dirs(&mapping.dest) {
            self.record_failure(&e);
            return;
        }

        self.log.log(&format!(
            "processing: from:{} to:{}",
            mapping.source.display(),
            mapping.dest.display()
        ));

        match self.transformer.process(&mapping.source, &mapping.dest) {
            Ok(()) => {
                self.stats.materialized.fetch_add(1, Ordering::Relaxed);
                self.log.log("is complete");
            }
            Err(source) => self.record_failure(&MirrorError::Processing {
                path: mapping.source.clone(),
                source,
            }),
        }
    }

    fn retire(&self, mapping: &PathMapping) {
        self.stats.retired.fetch_add(1, Ordering::Relaxed);
        self.log
            .log(&format!("file {} was deleted", mapping.source.display()));
    }

    fn record_failure(&self, error: &MirrorError) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        warn!("Event abandoned: {error}");
        let line = match error {
            MirrorError::Processing { path, source } => {
                format!("processing failed: from:{} error:{source:#}", path.display())
            }
            other => format!("event abandoned: {other}"),
        };
        self.log.log(&line);
    }
}

/// Make sure every ancestor directory of `dest` exists.
///
/// Directories that already exist, including ones created concurrently by
/// someone else, count as success.
pub fn ensure_parent_dirs(dest: &Path) -> Result<()> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    match std::fs::create_dir_all(parent) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && parent.is_dir() => Ok(()),
        Err(source) => Err(MirrorError::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        }),
    }
}

/// Counters shared between the engine's tasks.
#[derive(Debug, Default)]
pub struct MirrorStats {
    materialized: AtomicU64,
    retired: AtomicU64,
    failed: AtomicU64,
    directories_ignored: AtomicU64,
}

impl MirrorStats {
    /// Take a consistent-enough snapshot of the counters.
    pub fn snapshot(&self) -> SessionSummary {
        SessionSummary {
            materialized: self.materialized.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            directories_ignored: self.directories_ignored.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Files processed successfully.
    pub materialized: u64,

    /// Deletions recorded.
    pub retired: u64,

    /// Events abandoned because of an error.
    pub failed: u64,

    /// Directory events filtered out.
    pub directories_ignored: u64,
}
