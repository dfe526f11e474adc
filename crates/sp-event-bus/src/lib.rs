//! Event bus for scriptplay
//!
//! The engine publishes every observable step of a playback here. Components
//! subscribe to a single event kind or to everything. Delivery order is the
//! publish order: each channel is a single broadcast sender, and the engine
//! publishes from one logical thread of control.

use dashmap::DashMap;
use sp_core::{Context, EngineEvent, Event, EventKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The event bus for publishing and subscribing to engine events
///
/// Supports:
/// - Subscribing to one event kind
/// - Subscribing to all events
/// - Closing all channels on shutdown so listeners observe the end of the stream
pub struct EventBus {
    /// Map of event kinds to their broadcast senders
    listeners: DashMap<EventKind, broadcast::Sender<Event>>,
    /// Sender for subscribers of every event; None once closed
    match_all_sender: RwLock<Option<broadcast::Sender<Event>>>,
    /// Set once the bus is closed
    closed: AtomicBool,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender: RwLock::new(Some(match_all_sender)),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Subscribe to events of a specific kind
    ///
    /// A subscription taken after `close` yields a receiver that reports
    /// `Closed` immediately.
    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<Event> {
        trace!(event_kind = %kind, "Subscribing to event kind");

        if self.is_closed() {
            return closed_receiver();
        }

        self.listeners
            .entry(kind)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        match self.match_all_sender.read().unwrap().as_ref() {
            Some(sender) => sender.subscribe(),
            None => closed_receiver(),
        }
    }

    /// Fire an event to all subscribers
    ///
    /// The event will be delivered to:
    /// 1. All subscribers of its kind
    /// 2. All match-all subscribers
    pub fn fire(&self, event: Event) {
        if self.is_closed() {
            trace!(event_kind = %event.kind(), "Dropping event, bus closed");
            return;
        }

        trace!(event_kind = %event.kind(), "Firing event");

        if let Some(sender) = self.listeners.get(&event.kind()) {
            // Ignore send errors - they just mean no active receivers
            let _ = sender.send(event.clone());
        }

        if let Some(sender) = self.match_all_sender.read().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }

    /// Wrap a payload in an event envelope and fire it
    pub fn publish(&self, data: EngineEvent, context: &Context) {
        self.fire(Event::new(data, context.clone()));
    }

    /// Drop every sender so receivers see `RecvError::Closed`
    ///
    /// Publishing after close is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing event bus");
        self.listeners.clear();
        self.match_all_sender.write().unwrap().take();
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the number of active event kind subscriptions
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn closed_receiver() -> broadcast::Receiver<Event> {
    let (_, rx) = broadcast::channel(1);
    rx
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use sp_core::PlaybackState;

    fn line_executing(index: usize) -> EngineEvent {
        EngineEvent::LineExecuting {
            index,
            line: format!("line {}", index),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventKind::BreakpointHit);

        bus.publish(EngineEvent::BreakpointHit { index: 2 }, &Context::new());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data, EngineEvent::BreakpointHit { index: 2 });
    }

    #[tokio::test]
    async fn test_match_all_preserves_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();
        let ctx = Context::new();

        bus.publish(line_executing(0), &ctx);
        bus.publish(
            EngineEvent::StateChanged {
                old: PlaybackState::Playing,
                new: PlaybackState::Paused,
            },
            &ctx,
        );
        bus.publish(line_executing(1), &ctx);

        assert_eq!(rx.recv().await.unwrap().data, line_executing(0));
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::StateChanged);
        assert_eq!(rx.recv().await.unwrap().data, line_executing(1));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe(EventKind::ProgressChanged);
        let mut rx2 = bus.subscribe(EventKind::ProgressChanged);

        bus.publish(EngineEvent::ProgressChanged { progress: 0.5 }, &Context::new());

        assert_eq!(rx1.recv().await.unwrap().kind(), EventKind::ProgressChanged);
        assert_eq!(rx2.recv().await.unwrap().kind(), EventKind::ProgressChanged);
    }

    #[tokio::test]
    async fn test_no_cross_kind_pollution() {
        let bus = EventBus::new();
        let mut rx_lines = bus.subscribe(EventKind::LineExecuting);
        let mut rx_breaks = bus.subscribe(EventKind::BreakpointHit);

        bus.publish(line_executing(7), &Context::new());

        assert_eq!(rx_lines.recv().await.unwrap().data, line_executing(7));
        assert!(rx_breaks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bus = EventBus::new();
        let mut rx_all = bus.subscribe_all();
        let mut rx_kind = bus.subscribe(EventKind::LineExecuting);

        bus.close();
        bus.publish(line_executing(0), &Context::new());

        assert!(matches!(
            rx_all.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(matches!(
            rx_kind.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(bus.is_closed());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_after_close_is_closed() {
        let bus = EventBus::new();
        bus.close();

        let mut rx = bus.subscribe_all();
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
