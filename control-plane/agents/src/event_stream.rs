//! The Event Stream (§4.2): a lazy, restartable subscription. A fresh
//! subscriber first sees the *current* state re-expressed as `new` events --
//! not a replay of whatever raw events happened to still be buffered -- then
//! tails live changes with no gap. A subscription can be closed and is
//! restartable -- closing one and calling [`EventStream::subscribe`] again
//! starts a fresh cycle.
//!
//! This type is the live-tail primitive only: it has no notion of "replay",
//! because what counts as the replayable snapshot is producer-specific (for
//! the Registry, it is "every node's replicas, then pools, then nexuses,
//! then a `sync` marker" -- see [`crate::registry::Registry::subscribe`]).
//! A producer builds that snapshot itself and hands it to
//! [`Subscription::prepend`] before returning the subscription to its
//! caller, which is what makes the "subscribe -> always see current state
//! first" contract hold regardless of how long ago the producer's history
//! would otherwise have scrolled out of any bounded buffer.

use std::collections::VecDeque;
use tokio::sync::broadcast;

/// A multi-producer, multi-consumer live event bus.
#[derive(Clone)]
pub struct EventStream<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// `capacity` bounds how far a slow subscriber may lag behind the live
    /// stream before it starts missing events (reported as a skipped gap,
    /// never silently).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    /// Publish an event to every live subscriber. Having no live subscriber
    /// is not an error.
    pub fn publish(&self, payload: T) {
        let _ = self.tx.send(payload);
    }

    /// Start tailing live events. The receiver is registered before this
    /// call returns, so nothing published from this point on is missed --
    /// callers that need a replay prefix should build it from their own
    /// snapshot and pass it to [`Subscription::prepend`] immediately.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            prefix: VecDeque::new(),
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// A single subscriber's view of the stream: a synthesized prefix drained
/// first, then live events.
pub struct Subscription<T> {
    prefix: VecDeque<T>,
    rx: Option<broadcast::Receiver<T>>,
}

impl<T: Clone> Subscription<T> {
    /// Queue `events` ahead of whatever the live stream yields. Events
    /// published after [`EventStream::subscribe`] was called are still
    /// buffered by the live channel and will surface from [`Self::next`]
    /// only once the prefix is drained -- so a producer must take its
    /// snapshot after subscribing, never before.
    pub fn prepend(&mut self, events: impl IntoIterator<Item = T>) {
        for event in events {
            self.prefix.push_back(event);
        }
    }

    /// The next event: drains the prefix first, then tails live events.
    /// Returns `None` once [`Self::close`] has been called and no buffered
    /// prefix events remain.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(event) = self.prefix.pop_front() {
            return Some(event);
        }
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Detach from live events. Any events still buffered in the prefix
    /// remain available from [`Self::next`].
    pub fn close(&mut self) {
        self.rx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_is_drained_before_live_events() {
        let stream = EventStream::new(16);
        let mut sub = stream.subscribe();
        sub.prepend(["a", "b"]);
        stream.publish("c");

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(sub.next().await.unwrap());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn live_events_before_the_snapshot_is_taken_are_not_lost() {
        let stream = EventStream::new(16);
        let mut sub = stream.subscribe();
        // A live event published after subscribing but before the
        // producer has built/prepended its snapshot must still surface,
        // strictly after the prefix.
        stream.publish("live");
        sub.prepend(["snapshot"]);

        assert_eq!(sub.next().await.unwrap(), "snapshot");
        assert_eq!(sub.next().await.unwrap(), "live");
    }

    #[tokio::test]
    async fn close_stops_delivering_new_events() {
        let stream = EventStream::new(16);
        let mut sub = stream.subscribe();
        sub.close();
        stream.publish("late");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn a_fresh_subscriber_never_sees_events_from_before_it_subscribed() {
        let stream = EventStream::new(16);
        stream.publish("before");
        let mut sub = stream.subscribe();
        stream.publish("after");
        assert_eq!(sub.next().await.unwrap(), "after");
    }
}
