//! Status broadcast fan-out.
//!
//! Each subscriber owns a bounded queue. The read loop offers every matching
//! broadcast with `try_send` and moves on: a subscriber that falls behind
//! loses broadcasts (counted on its handle and in the session stats) but never
//! stalls the loop or the other subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::protocol::StatusBroadcast;

/// Which broadcasts a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    /// Every broadcast.
    All,
    /// Broadcasts whose command path starts with this word
    /// (`transmit`, `slice`, `client`, ...).
    Topic(String),
    /// Broadcasts from one origin handle.
    Origin(String),
}

impl StatusFilter {
    /// Shorthand for [`StatusFilter::Topic`].
    pub fn topic(topic: impl Into<String>) -> Self {
        Self::Topic(topic.into())
    }

    /// Returns `true` if `status` passes this filter.
    pub fn matches(&self, status: &StatusBroadcast) -> bool {
        match self {
            Self::All => true,
            Self::Topic(topic) => status.topic() == topic,
            Self::Origin(origin) => status.origin.eq_ignore_ascii_case(origin),
        }
    }
}

/// Receiving end of a status subscription.
///
/// Dropping it unsubscribes. `recv` returns `None` once the session closes.
#[derive(Debug)]
pub struct StatusSubscription {
    filter: StatusFilter,
    rx: mpsc::Receiver<StatusBroadcast>,
    dropped: Arc<AtomicU64>,
}

impl StatusSubscription {
    /// Wait for the next matching broadcast.
    pub async fn recv(&mut self) -> Option<StatusBroadcast> {
        self.rx.recv().await
    }

    /// Take a queued broadcast without waiting.
    pub fn try_recv(&mut self) -> Option<StatusBroadcast> {
        self.rx.try_recv().ok()
    }

    /// Filter this subscription was created with.
    pub fn filter(&self) -> &StatusFilter {
        &self.filter
    }

    /// Broadcasts this subscriber missed because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: StatusFilter,
    tx: mpsc::Sender<StatusBroadcast>,
    dropped: Arc<AtomicU64>,
}

/// Registered subscribers, in subscription order.
#[derive(Debug, Default)]
pub(crate) struct SubscriberList {
    subscribers: Vec<Subscriber>,
    closed: bool,
}

impl SubscriberList {
    /// Register a subscriber with a queue of `capacity`.
    ///
    /// After [`close`](Self::close) the returned subscription is already
    /// finished.
    pub(crate) fn add(&mut self, filter: StatusFilter, capacity: usize) -> StatusSubscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        if !self.closed {
            self.subscribers.push(Subscriber {
                filter: filter.clone(),
                tx,
                dropped: Arc::clone(&dropped),
            });
        }
        StatusSubscription {
            filter,
            rx,
            dropped,
        }
    }

    /// Offer `status` to every matching subscriber, in subscription order.
    ///
    /// Returns the number of subscribers that missed it. Subscribers whose
    /// handle was dropped are removed.
    pub(crate) fn publish(&mut self, status: &StatusBroadcast) -> u64 {
        let mut missed = 0;
        self.subscribers.retain(|sub| {
            if !sub.filter.matches(status) {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(status.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    missed += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
        if missed > 0 {
            log::debug!(
                "[Session] {missed} subscriber(s) behind, dropped {} broadcast",
                status.topic()
            );
        }
        missed
    }

    /// Drop every subscriber so their `recv` returns `None`.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.subscribers.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(origin: &str, body: &str) -> StatusBroadcast {
        StatusBroadcast::parse(origin, body)
    }

    #[test]
    fn test_topic_filter() {
        let tx = status("1F5C6BC", "transmit vox_enable=1");
        let slice = status("1F5C6BC", "slice 0 mode=USB");
        let filter = StatusFilter::topic("transmit");
        assert!(filter.matches(&tx));
        assert!(!filter.matches(&slice));
        assert!(StatusFilter::All.matches(&slice));
    }

    #[test]
    fn test_topic_filter_matches_whole_word() {
        let status = status("1", "transmitter state=on");
        assert!(!StatusFilter::topic("transmit").matches(&status));
    }

    #[test]
    fn test_origin_filter() {
        let ours = status("1F5C6BC", "slice 0 mode=USB");
        let theirs = status("2A", "slice 0 mode=USB");
        let filter = StatusFilter::Origin("1f5c6bc".to_string());
        assert!(filter.matches(&ours));
        assert!(!filter.matches(&theirs));
    }

    #[test]
    fn test_fan_out_preserves_order_per_subscriber() {
        let mut list = SubscriberList::default();
        let mut all = list.add(StatusFilter::All, 8);
        let mut slices = list.add(StatusFilter::topic("slice"), 8);

        list.publish(&status("1", "slice 0 mode=USB"));
        list.publish(&status("1", "transmit rfpower=26"));
        list.publish(&status("1", "slice 1 mode=CW"));

        let got: Vec<String> = std::iter::from_fn(|| all.try_recv()).map(|s| s.body).collect();
        assert_eq!(got, ["slice 0 mode=USB", "transmit rfpower=26", "slice 1 mode=CW"]);

        let got: Vec<String> = std::iter::from_fn(|| slices.try_recv()).map(|s| s.path).collect();
        assert_eq!(got, ["slice 0", "slice 1"]);
    }

    #[test]
    fn test_full_queue_drops_for_that_subscriber_only() {
        let mut list = SubscriberList::default();
        let mut slow = list.add(StatusFilter::All, 1);
        let mut fast = list.add(StatusFilter::All, 8);

        assert_eq!(list.publish(&status("1", "a x=1")), 0);
        assert_eq!(list.publish(&status("1", "b x=2")), 1);
        assert_eq!(list.publish(&status("1", "c x=3")), 1);

        assert_eq!(slow.dropped(), 2);
        assert_eq!(slow.try_recv().map(|s| s.path), Some("a".to_string()));
        assert!(slow.try_recv().is_none());

        assert_eq!(fast.dropped(), 0);
        let got: Vec<String> = std::iter::from_fn(|| fast.try_recv()).map(|s| s.path).collect();
        assert_eq!(got, ["a", "b", "c"]);
    }

    #[test]
    fn test_dropped_subscription_is_removed() {
        let mut list = SubscriberList::default();
        let sub = list.add(StatusFilter::All, 4);
        let _other = list.add(StatusFilter::topic("slice"), 4);
        drop(sub);

        list.publish(&status("1", "transmit x=1"));
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let mut list = SubscriberList::default();
        let mut sub = list.add(StatusFilter::All, 4);
        list.close();
        assert!(sub.recv().await.is_none());

        let mut late = list.add(StatusFilter::All, 4);
        assert!(late.recv().await.is_none());
        assert_eq!(list.len(), 0);
    }
}
