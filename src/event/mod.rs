//! Event stream to the application shell.
//!
//! The event sink holds at most one subscriber. Subscribing again replaces
//! the previous subscriber, whose stream then ends. Events emitted while
//! nobody is subscribed are dropped, not queued.
//!
//! Delivery goes through a channel, so the relay task that produces data
//! never runs consumer code: the consumer drains its [`Subscription`] on
//! whatever task or thread it likes.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Error code carried by relay failures.
pub const ERROR_CODE: &str = "ERROR";

/// Message carried by relay failures.
pub const RUN_ERROR_MESSAGE: &str = "Serial run error";

/// Event types pushed to the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Text decoded from one read of the active transport.
    Data(String),
    /// Fatal error on the active connection.
    Error {
        code: String,
        message: String,
        detail: Option<String>,
    },
    /// A connection was closed.
    Disconnected,
    /// A USB permission prompt was answered.
    Permission { device: String, granted: bool },
}

impl Event {
    /// Builds the error event for a failed relay.
    #[must_use]
    pub fn run_error(detail: impl Into<String>) -> Self {
        Self::Error {
            code: ERROR_CODE.into(),
            message: RUN_ERROR_MESSAGE.into(),
            detail: Some(detail.into()),
        }
    }
}

/// The receiving end of the event stream.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the subscription is replaced, cancelled, or the
    /// sink is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Single-subscriber event sink.
#[derive(Clone, Default)]
pub struct EventSink {
    subscriber: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
}

impl EventSink {
    /// Creates a sink with no subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new subscriber, detaching any previous one.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        if self.subscriber.lock().replace(tx).is_some() {
            tracing::debug!("event subscriber replaced");
        }
        Subscription { receiver }
    }

    /// Detaches the current subscriber.
    pub fn unsubscribe(&self) {
        if self.subscriber.lock().take().is_some() {
            tracing::debug!("event subscriber detached");
        }
    }

    /// Returns true if a live subscriber is attached.
    #[must_use]
    pub fn has_subscriber(&self) -> bool {
        self.subscriber
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Pushes an event to the subscriber, or drops it if there is none.
    pub fn emit(&self, event: Event) {
        let mut subscriber = self.subscriber.lock();
        let Some(tx) = subscriber.as_ref() else {
            tracing::trace!("no subscriber, dropping {:?}", event);
            return;
        };
        if tx.send(event).is_err() {
            tracing::debug!("event subscriber went away");
            *subscriber = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_to_subscriber() {
        let sink = EventSink::new();
        let mut sub = sink.subscribe();

        sink.emit(Event::Data("hello".into()));
        sink.emit(Event::Disconnected);

        assert_eq!(sub.recv().await, Some(Event::Data("hello".into())));
        assert_eq!(sub.recv().await, Some(Event::Disconnected));
    }

    #[tokio::test]
    async fn test_events_without_subscriber_are_dropped() {
        let sink = EventSink::new();
        sink.emit(Event::Data("lost".into()));

        let mut sub = sink.subscribe();
        sink.emit(Event::Data("kept".into()));

        assert_eq!(sub.try_recv(), Some(Event::Data("kept".into())));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous() {
        let sink = EventSink::new();
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.emit(Event::Disconnected);

        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await, Some(Event::Disconnected));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let sink = EventSink::new();
        let mut sub = sink.subscribe();
        assert!(sink.has_subscriber());

        sink.unsubscribe();
        sink.emit(Event::Disconnected);

        assert!(!sink.has_subscriber());
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_run_error_shape() {
        let event = Event::run_error("broken pipe");
        assert_eq!(
            event,
            Event::Error {
                code: "ERROR".into(),
                message: "Serial run error".into(),
                detail: Some("broken pipe".into()),
            }
        );
    }
}
