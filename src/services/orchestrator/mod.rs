//! Orchestrator - owns the task store, the bounded queue and the dispatch loop.
//!
//! - **types**: settings, status and broadcast events
//! - **pipeline**: the per-task execution state machine (admission, handler
//!   dispatch, gates, retry, follow-up derivation)
//!
//! Submissions go through a bounded queue and fail fast with
//! [`DomainError::QueueFull`] when it is saturated. Retries wait out their
//! backoff off-lock and are then re-enqueued on the same queue, waiting for
//! capacity rather than failing, so a retry is never dropped.

mod pipeline;
pub mod types;

pub use types::{OrchestratorEvent, OrchestratorSettings, OrchestratorStatus};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Config, Decision, Task, TaskId, TaskResult, TaskType};
use crate::domain::ports::StageHandler;
use crate::services::handler_registry::HandlerRegistry;
use crate::services::policy_engine::PolicyEngine;
use crate::services::task_store::{StoreStats, TaskStore};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Builder for [`Orchestrator`].
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    config: Config,
    policy: Option<PolicyEngine>,
    handlers: HandlerRegistry,
}

impl OrchestratorBuilder {
    /// Builder with default config and no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for queue, retry, lineage and default gates.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use this policy engine instead of one built from the config.
    pub fn policy_engine(mut self, policy: PolicyEngine) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register one stage handler.
    pub fn handler(mut self, task_type: TaskType, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.register(task_type, handler);
        self
    }

    /// Replace the whole registry.
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Validate the wiring and create the orchestrator.
    pub fn build(self) -> DomainResult<Orchestrator> {
        let settings = OrchestratorSettings::from(&self.config);
        if settings.queue_capacity == 0 {
            return Err(DomainError::ValidationFailed(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if settings.require_all_stages {
            self.handlers.validate_complete()?;
        }
        let policy = match self.policy {
            Some(policy) => policy,
            None => PolicyEngine::from_config(&self.config)?,
        };

        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            queue_capacity = settings.queue_capacity,
            handlers = self.handlers.len(),
            max_lineage_depth = settings.max_lineage_depth,
            "orchestrator built"
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                store: TaskStore::new(),
                policy,
                handlers: self.handlers,
                settings,
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                cancel: CancellationToken::new(),
                intake: RwLock::new(()),
                status: RwLock::new(OrchestratorStatus::Idle),
                events,
                in_flight: AtomicUsize::new(0),
                dispatcher: Mutex::new(None),
            }),
        })
    }
}

/// Shared state behind every clone of an [`Orchestrator`].
struct Inner {
    store: TaskStore,
    policy: PolicyEngine,
    handlers: HandlerRegistry,
    settings: OrchestratorSettings,
    queue_tx: mpsc::Sender<TaskId>,
    queue_rx: Mutex<Option<mpsc::Receiver<TaskId>>>,
    cancel: CancellationToken,
    /// Shared by enqueuers from the stop check until the id is sent;
    /// taken exclusively before the queue is drained.
    intake: RwLock<()>,
    status: RwLock<OrchestratorStatus>,
    events: broadcast::Sender<OrchestratorEvent>,
    /// Attempts between dequeue and follow-up submission.
    in_flight: AtomicUsize,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Workflow orchestrator. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.inner.settings)
            .field("handlers", &self.inner.handlers)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Start building an orchestrator.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Spawn the dispatch loop.
    pub async fn start(&self) -> DomainResult<()> {
        // Held until the handle is stored so a concurrent stop() joins it.
        let mut dispatcher = self.inner.dispatcher.lock().await;
        if self.inner.cancel.is_cancelled() {
            return Err(DomainError::OrchestratorStopped);
        }
        let rx = self.inner.queue_rx.lock().await.take().ok_or_else(|| {
            DomainError::ValidationFailed("orchestrator already started".to_string())
        })?;

        let inner = Arc::clone(&self.inner);
        *dispatcher = Some(tokio::spawn(inner.dispatch_loop(rx)));
        {
            let mut status = self.inner.status.write().await;
            if *status == OrchestratorStatus::Idle {
                *status = OrchestratorStatus::Running;
            }
        }
        info!("orchestrator started");
        Ok(())
    }

    /// Cancel in-flight work cooperatively, close intake and cancel every
    /// task still waiting in the queue.
    pub async fn stop(&self) {
        {
            let mut status = self.inner.status.write().await;
            if *status == OrchestratorStatus::Stopped {
                return;
            }
            *status = OrchestratorStatus::Stopped;
        }
        self.inner.cancel.cancel();

        let dispatcher = self.inner.dispatcher.lock().await.take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch loop ended abnormally");
            }
        }
        // Never started: the receiver is still here and must be drained.
        let unstarted = self.inner.queue_rx.lock().await.take();
        if let Some(rx) = unstarted {
            self.inner.drain_queue(rx).await;
        }

        self.inner.emit(OrchestratorEvent::Stopped);
        info!("orchestrator stopped");
    }

    /// Submit a task: assign an id, make it visible, then enqueue it.
    ///
    /// Never blocks on the queue; a saturated queue yields
    /// [`DomainError::QueueFull`].
    pub async fn submit(&self, task: Task) -> DomainResult<TaskId> {
        self.inner.submit(task).await
    }

    /// Task and latest result for `id`.
    pub async fn lookup(&self, id: TaskId) -> (Option<Task>, Option<TaskResult>) {
        self.inner.store.lookup(id).await
    }

    /// Task record for `id`.
    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.store.task(id).await
    }

    /// Latest result for `id`.
    pub async fn result(&self, id: TaskId) -> Option<TaskResult> {
        self.inner.store.result(id).await
    }

    /// Snapshot of the decision log.
    pub async fn decisions(&self) -> Vec<Decision> {
        self.inner.store.decisions().await
    }

    /// Task counts by state.
    pub async fn stats(&self) -> StoreStats {
        self.inner.store.stats().await
    }

    /// Every task, ordered by id.
    pub async fn all_tasks(&self) -> Vec<Task> {
        self.inner.store.all_tasks().await
    }

    /// Follow-ups spawned by `id`, ordered by id.
    pub async fn children_of(&self, id: TaskId) -> Vec<Task> {
        self.inner.store.children_of(id).await
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> OrchestratorStatus {
        *self.inner.status.read().await
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Admission and gate engine in use.
    pub fn policy_engine(&self) -> &PolicyEngine {
        &self.inner.policy
    }

    /// Effective settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Wait until no task is pending, running or retrying and no attempt is
    /// still deriving follow-ups. Returns `false` on timeout.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                if self.is_idle().await {
                    return;
                }
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    async fn is_idle(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) == 0
            && self.inner.store.stats().await.active() == 0
    }
}

impl Inner {
    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn submit(&self, task: Task) -> DomainResult<TaskId> {
        task.validate()?;
        let _intake = self.intake.read().await;
        if self.cancel.is_cancelled() {
            return Err(DomainError::OrchestratorStopped);
        }

        let permit = self.queue_tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => DomainError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => DomainError::OrchestratorStopped,
        })?;

        let task = self.store.insert(task).await;
        self.emit(OrchestratorEvent::Submitted {
            task_id: task.id,
            task_type: task.task_type,
            parent_id: task.parent_id,
        });
        permit.send(task.id);

        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            parent_id = ?task.parent_id,
            depth = task.depth,
            "task submitted"
        );
        Ok(task.id)
    }

    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<TaskId>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(id) => {
                        self.in_flight.fetch_add(1, Ordering::SeqCst);
                        let inner = Arc::clone(&self);
                        tokio::spawn(async move {
                            let _guard = InFlightGuard(&inner.in_flight);
                            Arc::clone(&inner).execute(id).await;
                        });
                    }
                    None => break,
                },
            }
        }
        self.drain_queue(rx).await;
        debug!("dispatch loop exited");
    }

    /// Close the queue and cancel whatever is still in it.
    ///
    /// Waits for enqueuers that passed the stop check to send their id, so
    /// nothing accepted can land in a dropped receiver.
    async fn drain_queue(&self, mut rx: mpsc::Receiver<TaskId>) {
        let _intake = self.intake.write().await;
        rx.close();
        while let Ok(id) = rx.try_recv() {
            self.cancel_task(id, "orchestrator stopped before the task ran")
                .await;
        }
    }
}

/// Decrements the in-flight counter when an attempt finishes.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
