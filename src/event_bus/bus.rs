use std::sync::{Arc, Mutex};

use futures_util::stream::BoxStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task;

use super::emitter::{BusEmitter, EventEmitter};
use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Default capacity of the broadcast buffer behind [`EventStream`].
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// EventBus receives events on an intake channel and fans them out to every
/// registered sink plus any live [`EventStream`] subscriptions.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    event_channel: (flume::Sender<Event>, flume::Receiver<Event>),
    listener: Arc<Mutex<Option<ListenerState>>>,
    broadcast: Arc<Mutex<Option<broadcast::Sender<Event>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// Create an EventBus with a single sink.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    /// Create an EventBus with multiple sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_sinks_and_capacity(sinks, DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create an EventBus with multiple sinks and an explicit broadcast
    /// buffer capacity.
    pub fn with_sinks_and_capacity(sinks: Vec<Box<dyn EventSink>>, capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_BROADCAST_CAPACITY
        } else {
            capacity
        };
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            event_channel: flume::unbounded(),
            listener: Arc::new(Mutex::new(None)),
            broadcast: Arc::new(Mutex::new(Some(broadcast_tx))),
            capacity,
        }
    }

    /// Dynamically add a sink (useful for per-request streaming).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.add_boxed_sink(Box::new(sink));
    }

    /// Add an already-boxed sink.
    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        self.sinks.lock().expect("sinks poisoned").push(sink);
    }

    /// Clone of the intake sender for producers that want the raw channel.
    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.event_channel.0.clone()
    }

    /// Emitter handle for nodes and the runner.
    pub fn get_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(BusEmitter::new(self.event_channel.0.clone()))
    }

    /// Subscribe to the broadcast feed.
    ///
    /// Subscriptions only see events emitted after this call. If the feed
    /// was closed by a previous run, a fresh feed is created.
    pub fn subscribe(&self) -> EventStream {
        let mut guard = self.broadcast.lock().expect("broadcast poisoned");
        let sender = guard.get_or_insert_with(|| broadcast::channel(self.capacity).0);
        EventStream::new(sender.subscribe())
    }

    /// Close the broadcast feed; live subscriptions terminate after
    /// draining buffered events.
    pub fn close_channel(&self) {
        self.broadcast.lock().expect("broadcast poisoned").take();
    }

    /// Spawn a background task that forwards intake events to all sinks and
    /// the broadcast feed. Idempotent.
    pub fn listen_for_events(&self) {
        let mut guard = self.listener.lock().expect("listener poisoned");
        if guard.is_some() {
            return;
        }

        let receiver = self.event_channel.1.clone();
        let sinks = self.sinks.clone();
        let broadcast = self.broadcast.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            let forward = |event: Event| {
                {
                    let mut sinks_guard = sinks.lock().expect("sinks poisoned");
                    for sink in sinks_guard.iter_mut() {
                        if let Err(e) = sink.handle(&event) {
                            tracing::warn!(error = %e, "event sink error");
                        }
                    }
                }
                if let Some(tx) = broadcast.lock().expect("broadcast poisoned").as_ref() {
                    // No receivers is fine; sinks already saw it.
                    let _ = tx.send(event);
                }
            };

            let mut shutdown_rx = shutdown_rx;
            let mut shutdown_armed = true;
            loop {
                if shutdown_armed {
                    tokio::select! {
                        result = &mut shutdown_rx => {
                            if result.is_ok() {
                                break;
                            }
                            // Bus dropped without an explicit stop: keep
                            // draining until every sender is gone so queued
                            // events (the stream-end marker included) still
                            // reach subscribers.
                            shutdown_armed = false;
                        }
                        recv = receiver.recv_async() => match recv {
                            Err(_) => break,
                            Ok(event) => forward(event),
                        }
                    }
                } else {
                    match receiver.recv_async().await {
                        Err(_) => break,
                        Ok(event) => forward(event),
                    }
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background listener task.
    pub async fn stop_listener(&self) {
        let state = {
            let mut guard = self.listener.lock().expect("listener poisoned");
            guard.take()
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // Detach rather than abort: the listener keeps draining queued
        // events until every sender is gone, then exits on its own.
        if let Ok(mut guard) = self.listener.lock() {
            guard.take();
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

/// Single-use subscription to a run's event feed.
///
/// The feed is finite: the runner emits a diagnostic with scope
/// [`STREAM_END_SCOPE`](super::event::STREAM_END_SCOPE) when a run
/// completes, suspends, or fails. The stream yields that marker as its
/// final event and then reports exhaustion; it is not restartable.
pub struct EventStream {
    inner: broadcast::Receiver<Event>,
    ended: bool,
}

impl EventStream {
    fn new(inner: broadcast::Receiver<Event>) -> Self {
        Self {
            inner,
            ended: false,
        }
    }

    /// Await the next event; `None` once the stream-end marker has been
    /// delivered or the feed is closed. Lag notifications are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        if self.ended {
            return None;
        }
        loop {
            match self.inner.recv().await {
                Ok(event) => {
                    if event.scope_label() == Some(super::event::STREAM_END_SCOPE) {
                        self.ended = true;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.ended = true;
                    return None;
                }
            }
        }
    }

    /// Await the next event with a timeout.
    pub async fn next_timeout(&mut self, duration: std::time::Duration) -> Option<Event> {
        tokio::time::timeout(duration, self.recv()).await.ok()?
    }

    /// Convert into an async `Stream` of events.
    pub fn into_async_stream(self) -> BoxStream<'static, Event> {
        Box::pin(futures_util::stream::unfold(self, |mut stream| async {
            stream.recv().await.map(|event| (event, stream))
        }))
    }
}
