//! In-process domain event bus.
//!
//! `publish` never blocks: it enqueues onto a bounded channel and returns.
//! A single dispatcher task drains the channel and runs every matching
//! handler for one event concurrently before taking the next event, so each
//! subscriber observes events in publish order. Handler errors and panics are
//! isolated per handler and reported to the registered error callbacks.
//! A handler still running after `handler_timeout` is abandoned and reported
//! as failed, so one stuck subscriber delays the queue by at most that long.
//!
//! When the queue is full the event is dropped with a warning.

use crate::domain::errors::EventBusError;
use crate::domain::events::{DomainEvent, EventType};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type SubscriptionId = u64;

/// Subscriber to domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Failure of one handler on one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerFailure {
    pub handler: String,
    pub event_type: EventType,
    pub event_id: Uuid,
    pub error: String,
    pub panicked: bool,
}

pub type ErrorCallback = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// Outcome of dispatching a single event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventBusStats {
    pub running: bool,
    pub queued: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub handler_failures: u64,
    pub handlers_by_type: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusConfig {
    pub queue_size: usize,
    pub shutdown_timeout: Duration,
    /// Longest a single handler may run on one event
    pub handler_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            shutdown_timeout: Duration::from_secs(5),
            handler_timeout: Duration::from_secs(5),
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every event type
    event_type: Option<EventType>,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

struct Lifecycle {
    receiver: Option<mpsc::Receiver<DomainEvent>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    stopped: bool,
}

struct Inner {
    config: EventBusConfig,
    sender: mpsc::Sender<DomainEvent>,
    subscriptions: RwLock<Vec<Subscription>>,
    error_callbacks: RwLock<Vec<ErrorCallback>>,
    next_id: AtomicU64,
    running: AtomicBool,
    counters: Counters,
    lifecycle: Mutex<Lifecycle>,
}

/// Event bus for publishing domain events to independent subscribers
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                sender,
                subscriptions: RwLock::new(Vec::new()),
                error_callbacks: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                running: AtomicBool::new(false),
                counters: Counters::default(),
                lifecycle: Mutex::new(Lifecycle {
                    receiver: Some(receiver),
                    shutdown_tx: None,
                    worker: None,
                    stopped: false,
                }),
            }),
        }
    }

    /// Subscribe a handler to one event type
    pub async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        self.add_subscription(Some(event_type), handler).await
    }

    /// Subscribe a handler to every event type
    pub async fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.add_subscription(None, handler).await
    }

    /// Subscribe a closure returning a future
    pub async fn subscribe_fn<F, Fut>(
        &self,
        event_type: EventType,
        name: impl Into<String>,
        f: F,
    ) -> SubscriptionId
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(FnHandler {
            name: name.into(),
            f,
        });
        self.add_subscription(Some(event_type), handler).await
    }

    async fn add_subscription(
        &self,
        event_type: Option<EventType>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            "EventBus: '{}' subscribed to {}",
            handler.name(),
            event_type.map(|t| t.as_str()).unwrap_or("*")
        );
        self.inner.subscriptions.write().await.push(Subscription {
            id,
            event_type,
            handler,
        });
        id
    }

    /// Remove a subscription. Returns false if the id was unknown.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Register a callback invoked for every handler failure.
    pub async fn on_error(&self, callback: ErrorCallback) {
        self.inner.error_callbacks.write().await.push(callback);
    }

    /// Enqueue an event without waiting. Returns false if it was dropped.
    pub fn publish(&self, event: DomainEvent) -> bool {
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        match self.inner.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "EventBus: queue full ({}), dropping {} {}",
                    self.inner.config.queue_size,
                    event.event_type(),
                    event.event_id()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "EventBus: stopped, dropping {} {}",
                    event.event_type(),
                    event.event_id()
                );
                false
            }
        }
    }

    /// Dispatch inline, returning once every matching handler has run.
    pub async fn publish_and_wait(&self, event: DomainEvent) -> DispatchReport {
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        self.inner.dispatch(&event).await
    }

    /// Spawn the dispatcher task.
    pub async fn start(&self) -> Result<(), EventBusError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.stopped {
            return Err(EventBusError::Stopped);
        }
        let Some(receiver) = lifecycle.receiver.take() else {
            return Err(EventBusError::AlreadyStarted);
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let inner = self.inner.clone();
        lifecycle.worker = Some(tokio::spawn(dispatch_loop(inner, receiver, shutdown_rx)));
        lifecycle.shutdown_tx = Some(shutdown_tx);
        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            "EventBus: started (queue size {})",
            self.inner.config.queue_size
        );
        Ok(())
    }

    /// Drain queued events and stop the dispatcher, bounded by the shutdown timeout.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        lifecycle.stopped = true;
        // Never-started bus: close the channel so later publishes are dropped
        lifecycle.receiver = None;

        if let Some(tx) = lifecycle.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut worker) = lifecycle.worker.take() {
            let timeout = self.inner.config.shutdown_timeout;
            match tokio::time::timeout(timeout, &mut worker).await {
                Ok(_) => info!("EventBus: stopped after draining queue"),
                Err(_) => {
                    warn!(
                        "EventBus: drain exceeded {:?}, aborting dispatcher",
                        timeout
                    );
                    worker.abort();
                }
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.read().await.len()
    }

    pub async fn stats(&self) -> EventBusStats {
        let counters = &self.inner.counters;
        let sender = &self.inner.sender;
        let subs = self.inner.subscriptions.read().await;

        let mut handlers_by_type = HashMap::new();
        for event_type in EventType::ALL {
            let count = subs
                .iter()
                .filter(|s| s.event_type.is_none_or(|t| t == event_type))
                .count();
            if count > 0 {
                handlers_by_type.insert(event_type.as_str().to_string(), count);
            }
        }

        EventBusStats {
            running: self.is_running(),
            queued: sender.max_capacity() - sender.capacity(),
            published: counters.published.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
            handlers_by_type,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_loop(
    inner: Arc<Inner>,
    mut receiver: mpsc::Receiver<DomainEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                let mut drained = 0usize;
                while let Ok(event) = receiver.try_recv() {
                    inner.dispatch(&event).await;
                    drained += 1;
                }
                debug!("EventBus: drained {} events on shutdown", drained);
                break;
            }
            maybe = receiver.recv() => match maybe {
                Some(event) => {
                    inner.dispatch(&event).await;
                }
                None => break,
            },
        }
    }
}

impl Inner {
    async fn dispatch(&self, event: &DomainEvent) -> DispatchReport {
        let event_type = event.event_type();
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.event_type.is_none_or(|t| t == event_type))
            .map(|s| s.handler.clone())
            .collect();

        if handlers.is_empty() {
            return DispatchReport::default();
        }

        let limit = self.config.handler_timeout;
        let outcomes = join_all(handlers.iter().map(|h| {
            tokio::time::timeout(limit, AssertUnwindSafe(h.handle(event)).catch_unwind())
        }))
        .await;

        let mut report = DispatchReport::default();
        for (handler, outcome) in handlers.iter().zip(outcomes) {
            let (error, panicked) = match outcome {
                Ok(Ok(Ok(()))) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Ok(Err(e))) => (format!("{:#}", e), false),
                Ok(Err(panic)) => (panic_message(panic.as_ref()), true),
                Err(_) => (format!("timed out after {:?}", limit), false),
            };
            let failure = HandlerFailure {
                handler: handler.name().to_string(),
                event_type,
                event_id: event.event_id(),
                error,
                panicked,
            };
            error!(
                "EventBus: handler '{}' failed on {} {}: {}",
                failure.handler, event_type, failure.event_id, failure.error
            );
            self.report_failure(&failure).await;
            report.failures.push(failure);
        }

        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .handler_failures
            .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
        report
    }

    async fn report_failure(&self, failure: &HandlerFailure) {
        let callbacks = self.error_callbacks.read().await.clone();
        for callback in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(failure))).is_err() {
                error!("EventBus: error callback panicked while reporting '{}'", failure.handler);
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}
