//! Lifecycle signals consumed and lifecycle events produced by providers.
//!
//! Signals (`router.start`, `router.stop`) flow from the host into the
//! providers through a [`LifecycleBus`]. Events (`connection_open`,
//! `connection_close`) flow from the providers out through an injected
//! [`EventDispatcher`].

use std::fmt;

use async_trait::async_trait;
use rawsock_core::ConnectionId;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::peer::SessionRef;

/// Name of the event emitted when a connection is accepted.
pub const CONNECTION_OPEN: &str = "connection_open";

/// Name of the event emitted when a connection closes.
pub const CONNECTION_CLOSE: &str = "connection_close";

/// Priority at which transport providers subscribe to lifecycle signals.
pub const PROVIDER_PRIORITY: i32 = 10;

/// Event buffer size for the broadcast dispatcher.
const EVENT_BUFFER: usize = 100;

// ============================================================================
// Signals
// ============================================================================

/// Payload-free signal that triggers provider setup or teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
    RouterStart,
    RouterStop,
}

impl LifecycleSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RouterStart => "router.start",
            Self::RouterStop => "router.stop",
        }
    }
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that reacts to lifecycle signals.
#[async_trait]
pub trait LifecycleSubscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Signals this subscriber wants, each with its priority.
    fn subscribed_signals(&self) -> Vec<(LifecycleSignal, i32)>;

    async fn on_signal(&self, signal: LifecycleSignal) -> Result<(), ProviderError>;
}

struct Subscription {
    signal: LifecycleSignal,
    priority: i32,
    subscriber: std::sync::Arc<dyn LifecycleSubscriber>,
}

/// Delivers lifecycle signals to subscribers in priority order.
///
/// Higher priorities run first; equal priorities run in subscription order.
#[derive(Default)]
pub struct LifecycleBus {
    subscriptions: Vec<Subscription>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every signal the subscriber declares.
    pub fn subscribe(&mut self, subscriber: std::sync::Arc<dyn LifecycleSubscriber>) {
        for (signal, priority) in subscriber.subscribed_signals() {
            debug!(
                subscriber = subscriber.name(),
                signal = %signal,
                priority,
                "Lifecycle subscription added"
            );
            self.subscriptions.push(Subscription {
                signal,
                priority,
                subscriber: std::sync::Arc::clone(&subscriber),
            });
        }
        // Stable sort keeps subscription order within a priority.
        self.subscriptions.sort_by_key(|s| std::cmp::Reverse(s.priority));
    }

    /// Number of subscriptions for `signal`.
    pub fn subscriber_count(&self, signal: LifecycleSignal) -> usize {
        self.subscriptions.iter().filter(|s| s.signal == signal).count()
    }

    /// Delivers `signal` to every subscriber, continuing past failures.
    ///
    /// Returns the failures as `(subscriber name, error)` pairs.
    pub async fn emit(&self, signal: LifecycleSignal) -> Vec<(String, ProviderError)> {
        debug!(signal = %signal, "Emitting lifecycle signal");

        let mut failures = Vec::new();
        for sub in self.subscriptions.iter().filter(|s| s.signal == signal) {
            if let Err(e) = sub.subscriber.on_signal(signal).await {
                warn!(
                    subscriber = sub.subscriber.name(),
                    signal = %signal,
                    error = %e,
                    "Lifecycle subscriber failed"
                );
                failures.push((sub.subscriber.name().to_string(), e));
            }
        }
        failures
    }
}

// ============================================================================
// Events
// ============================================================================

/// Connection lifecycle notification carrying the bound session.
#[derive(Clone)]
pub enum LifecycleEvent {
    ConnectionOpen {
        connection: ConnectionId,
        session: SessionRef,
    },
    ConnectionClose {
        connection: ConnectionId,
        session: SessionRef,
    },
}

impl LifecycleEvent {
    /// Returns the event name passed to the dispatcher.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionOpen { .. } => CONNECTION_OPEN,
            Self::ConnectionClose { .. } => CONNECTION_CLOSE,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::ConnectionOpen { connection, .. } | Self::ConnectionClose { connection, .. } => {
                *connection
            }
        }
    }

    pub fn session(&self) -> &SessionRef {
        match self {
            Self::ConnectionOpen { session, .. } | Self::ConnectionClose { session, .. } => session,
        }
    }
}

impl fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("name", &self.name())
            .field("connection", &self.connection())
            .finish_non_exhaustive()
    }
}

/// Delivers named lifecycle events to interested listeners.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: LifecycleEvent, name: &str);
}

/// Dispatcher fanning events out over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastDispatcher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Subscribes to events dispatched from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher for BroadcastDispatcher {
    fn dispatch(&self, event: LifecycleEvent, name: &str) {
        debug!(event = name, connection = %event.connection(), "Dispatching lifecycle event");
        // Ignore if no listeners
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::peer::Session;
    use rawsock_core::Message;
    use std::sync::{Arc, Mutex};

    struct NullSession;

    impl Session for NullSession {
        fn dispatch_message(&self, _msg: Message) {}

        fn shutdown(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    struct Recorder {
        name: String,
        priority: i32,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LifecycleSubscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn subscribed_signals(&self) -> Vec<(LifecycleSignal, i32)> {
            vec![(LifecycleSignal::RouterStart, self.priority)]
        }

        async fn on_signal(&self, signal: LifecycleSignal) -> Result<(), ProviderError> {
            self.log.lock().unwrap().push(format!("{}:{signal}", self.name));
            if self.fail {
                return Err(ProviderError::AlreadyStarted);
            }
            Ok(())
        }
    }

    fn recorder(name: &str, priority: i32, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            name: name.to_string(),
            priority,
            fail,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(LifecycleSignal::RouterStart.name(), "router.start");
        assert_eq!(LifecycleSignal::RouterStop.to_string(), "router.stop");
    }

    #[tokio::test]
    async fn test_bus_orders_by_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = LifecycleBus::new();
        bus.subscribe(recorder("low", 0, false, &log));
        bus.subscribe(recorder("high", 20, false, &log));
        bus.subscribe(recorder("mid-a", 10, false, &log));
        bus.subscribe(recorder("mid-b", 10, false, &log));

        assert!(bus.emit(LifecycleSignal::RouterStart).await.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "high:router.start",
                "mid-a:router.start",
                "mid-b:router.start",
                "low:router.start"
            ]
        );
    }

    #[tokio::test]
    async fn test_bus_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = LifecycleBus::new();
        bus.subscribe(recorder("broken", 10, true, &log));
        bus.subscribe(recorder("fine", 0, false, &log));

        let failures = bus.emit(LifecycleSignal::RouterStart).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bus_ignores_unsubscribed_signal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = LifecycleBus::new();
        bus.subscribe(recorder("start-only", 10, false, &log));

        assert_eq!(bus.subscriber_count(LifecycleSignal::RouterStop), 0);
        bus.emit(LifecycleSignal::RouterStop).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_dispatcher_delivers_same_session() {
        let dispatcher = BroadcastDispatcher::new();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.listener_count(), 1);

        let session: SessionRef = Arc::new(NullSession);
        let event = LifecycleEvent::ConnectionOpen {
            connection: ConnectionId::new(3),
            session: Arc::clone(&session),
        };
        dispatcher.dispatch(event.clone(), event.name());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), CONNECTION_OPEN);
        assert_eq!(received.connection(), ConnectionId::new(3));
        assert!(Arc::ptr_eq(received.session(), &session));
    }

    #[test]
    fn test_dispatch_without_listeners_is_ignored() {
        let dispatcher = BroadcastDispatcher::new();
        dispatcher.dispatch(
            LifecycleEvent::ConnectionClose {
                connection: ConnectionId::new(1),
                session: Arc::new(NullSession),
            },
            CONNECTION_CLOSE,
        );
    }
}
