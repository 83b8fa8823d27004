//! Strictly ordered, single-worker command queue
//!
//! Producers on any thread call [`CommandQueue::enqueue`]; one dedicated worker
//! task drains the queue in insertion order through a [`CommandExecutor`].
//! Every state change goes through one mutex, so cleanup passes and status
//! lookups are linearizable with the worker's transitions.

use super::executor::CommandExecutor;
use super::rate_limit::{RateLimitConfig, RateLimiter};
use futures::FutureExt;
use node_console_shared::{defaults, now_ms, Command, CommandError, CommandId, CommandStatus, TokenRef};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue construction options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Remove terminal commands as soon as they finish
    pub auto_cleanup: bool,
    /// Admission rate for execution; `None` runs commands back to back
    pub rate_limit: Option<RateLimitConfig>,
    /// Buffered lifecycle events per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            auto_cleanup: true,
            rate_limit: None,
            event_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Lifecycle notifications emitted on every state transition
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued {
        id: CommandId,
        token_ref: Option<TokenRef>,
    },
    Started {
        id: CommandId,
    },
    Completed {
        id: CommandId,
        elapsed_ms: u64,
    },
    Failed {
        id: CommandId,
        error: CommandError,
    },
    /// Terminal commands removed from the queue
    CleanedUp {
        ids: Vec<CommandId>,
    },
}

/// Resolves to the terminal snapshot of one submitted command
#[derive(Debug)]
pub struct Completion {
    id: CommandId,
    rx: oneshot::Receiver<Command>,
}

impl Completion {
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Wait for the command to reach a terminal state.
    ///
    /// Resolves even if the command was reclaimed right after finishing.
    pub async fn wait(self) -> Result<Command, CommandError> {
        self.rx.await.map_err(|_| CommandError::QueueClosed)
    }
}

enum WorkerSignal {
    Run(CommandId),
    Shutdown,
}

enum Begin {
    Run(String),
    Closed,
    Skip,
}

struct QueueState {
    /// Resident commands; ids increase front to back
    commands: VecDeque<Command>,
    waiters: HashMap<CommandId, oneshot::Sender<Command>>,
    next_id: u64,
    auto_cleanup: bool,
    processing: bool,
    closed: bool,
}

impl QueueState {
    fn position(&self, id: CommandId) -> Option<usize> {
        self.commands.binary_search_by_key(&id, |c| c.id).ok()
    }

    /// Record the terminal outcome of the command at `pos`, resolve its waiter
    /// and reclaim it when auto-cleanup is on
    fn settle(
        &mut self,
        pos: usize,
        outcome: Result<String, CommandError>,
        events: &broadcast::Sender<QueueEvent>,
    ) {
        let command = &mut self.commands[pos];
        let was_processing = command.status == CommandStatus::Processing;
        if !command.finish(outcome, now_ms()) {
            return;
        }
        if was_processing {
            self.processing = false;
        }

        let snapshot = command.clone();
        let id = snapshot.id;
        let event = match &snapshot.error {
            None => {
                let elapsed_ms = snapshot.elapsed_ms().unwrap_or(0);
                info!("Command {} completed in {}ms", id, elapsed_ms);
                QueueEvent::Completed { id, elapsed_ms }
            }
            Some(e) => {
                warn!("Command {} failed: {}", id, e);
                QueueEvent::Failed { id, error: e.clone() }
            }
        };
        let _ = events.send(event);

        if let Some(waiter) = self.waiters.remove(&id) {
            let _ = waiter.send(snapshot);
        }

        if self.auto_cleanup {
            self.commands.remove(pos);
            debug!("Command {} reclaimed", id);
            let _ = events.send(QueueEvent::CleanedUp { ids: vec![id] });
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn begin(&self, id: CommandId) -> Begin {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Begin::Closed;
        }
        let Some(pos) = state.position(id) else {
            return Begin::Skip;
        };

        debug_assert!(!state.processing, "worker started a second command");
        let command = &mut state.commands[pos];
        if !command.begin(now_ms()) {
            return Begin::Skip;
        }
        let text = command.text.clone();
        state.processing = true;

        debug!("Command {} started: {:?}", id, text);
        let _ = self.events.send(QueueEvent::Started { id });
        Begin::Run(text)
    }

    fn finish(&self, id: CommandId, outcome: Result<String, CommandError>) {
        let mut guard = self.lock();
        if let Some(pos) = guard.position(id) {
            guard.settle(pos, outcome, &self.events);
        }
    }

    /// Fail every command that will never run
    fn fail_unfinished(&self) {
        let mut guard = self.lock();
        guard.closed = true;
        let unfinished: Vec<CommandId> = guard
            .commands
            .iter()
            .filter(|c| !c.is_terminal())
            .map(|c| c.id)
            .collect();
        for id in unfinished {
            if let Some(pos) = guard.position(id) {
                guard.settle(pos, Err(CommandError::QueueClosed), &self.events);
            }
        }
    }
}

/// Thread-safe FIFO command queue with exactly one execution worker
pub struct CommandQueue {
    shared: Arc<Shared>,
    signal_tx: mpsc::UnboundedSender<WorkerSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Create a queue and spawn its worker; must be called within a tokio runtime
    pub fn new<E: CommandExecutor>(executor: E, config: QueueConfig) -> Self {
        let limiter = config
            .rate_limit
            .clone()
            .map(|c| Arc::new(RateLimiter::new(c)));
        Self::with_rate_limiter(executor, config, limiter)
    }

    /// Create a queue gated by an explicitly provided limiter
    pub fn with_rate_limiter<E: CommandExecutor>(
        executor: E,
        config: QueueConfig,
        limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                commands: VecDeque::new(),
                waiters: HashMap::new(),
                next_id: 0,
                auto_cleanup: config.auto_cleanup,
                processing: false,
                closed: false,
            }),
            events,
        });

        let worker = tokio::spawn(worker_loop(executor, shared.clone(), signal_rx, limiter));

        Self {
            shared,
            signal_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Append a command at the tail. Never blocks and never rejects.
    pub fn enqueue(&self, text: impl Into<String>, token_ref: Option<TokenRef>) -> CommandId {
        self.push(text.into(), token_ref, None)
    }

    /// Append a command and get a handle that resolves when it finishes
    pub fn submit(&self, text: impl Into<String>, token_ref: Option<TokenRef>) -> Completion {
        let (tx, rx) = oneshot::channel();
        let id = self.push(text.into(), token_ref, Some(tx));
        Completion { id, rx }
    }

    fn push(
        &self,
        text: String,
        token_ref: Option<TokenRef>,
        waiter: Option<oneshot::Sender<Command>>,
    ) -> CommandId {
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        state.next_id += 1;
        let id = CommandId(state.next_id);
        debug!("Command {} enqueued: {:?}", id, text);
        state
            .commands
            .push_back(Command::new(id, text, token_ref.clone(), now_ms()));
        if let Some(waiter) = waiter {
            state.waiters.insert(id, waiter);
        }
        let _ = self.shared.events.send(QueueEvent::Enqueued { id, token_ref });

        // Sending under the lock keeps channel order identical to queue order
        if state.closed || self.signal_tx.send(WorkerSignal::Run(id)).is_err() {
            state.closed = true;
            let pos = state.commands.len() - 1;
            state.settle(pos, Err(CommandError::QueueClosed), &self.shared.events);
        }
        id
    }

    /// Toggle automatic reclamation of commands that finish from now on
    pub fn set_auto_cleanup(&self, enabled: bool) {
        self.shared.lock().auto_cleanup = enabled;
        debug!("Auto-cleanup {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn auto_cleanup(&self) -> bool {
        self.shared.lock().auto_cleanup
    }

    /// Remove every `Completed` command; failed, pending and processing
    /// commands stay. Returns how many were removed.
    pub fn manual_cleanup(&self) -> usize {
        let mut guard = self.shared.lock();
        let mut removed = Vec::new();
        guard.commands.retain(|c| {
            if c.status == CommandStatus::Completed {
                removed.push(c.id);
                false
            } else {
                true
            }
        });

        let count = removed.len();
        if count > 0 {
            info!("Cleaned up {} completed commands", count);
            let _ = self.shared.events.send(QueueEvent::CleanedUp { ids: removed });
        }
        count
    }

    /// Snapshot of a resident command
    pub fn status_of(&self, id: CommandId) -> Result<Command, CommandError> {
        let guard = self.shared.lock();
        guard
            .position(id)
            .map(|pos| guard.commands[pos].clone())
            .ok_or(CommandError::NotFound(id))
    }

    /// All resident commands in execution order
    pub fn snapshot(&self) -> Vec<Command> {
        self.shared.lock().commands.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True exactly while the worker is executing a command
    pub fn is_processing(&self) -> bool {
        self.shared.lock().processing
    }

    /// Subscribe to lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    /// Stop the worker. The in-flight command finishes (or times out);
    /// commands still pending are failed with [`CommandError::QueueClosed`].
    pub async fn shutdown(&self) {
        self.shared.lock().closed = true;
        let _ = self.signal_tx.send(WorkerSignal::Shutdown);

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Command queue worker ended abnormally: {}", e);
                self.shared.fail_unfinished();
            }
        }
    }
}

/// The single worker: runs commands one at a time in signal order
async fn worker_loop<E: CommandExecutor>(
    mut executor: E,
    shared: Arc<Shared>,
    mut signals: mpsc::UnboundedReceiver<WorkerSignal>,
    limiter: Option<Arc<RateLimiter>>,
) {
    info!("Command queue worker started");

    while let Some(signal) = signals.recv().await {
        let id = match signal {
            WorkerSignal::Run(id) => id,
            WorkerSignal::Shutdown => break,
        };

        if let Some(limiter) = &limiter {
            if !shared.is_closed() {
                limiter.acquire().await;
            }
        }

        match shared.begin(id) {
            Begin::Run(text) => {
                let outcome = match AssertUnwindSafe(executor.execute(&text)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!("Executor panicked on command {}", id);
                        Err(CommandError::Execution("executor panicked".into()))
                    }
                };
                shared.finish(id, outcome);
            }
            Begin::Closed => shared.finish(id, Err(CommandError::QueueClosed)),
            Begin::Skip => {}
        }
    }

    shared.fail_unfinished();
    executor.close().await;
    info!("Command queue worker stopped");
}
