//! Per-user change broadcaster.
//!
//! One topic per user. Each subscriber holds a bounded mpsc queue; publish
//! is fire-and-forget and a subscriber whose queue is full is dropped
//! rather than back-pressuring the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;
use waypoint_core::UserId;

use crate::tags::ChangeTag;

/// Queue capacity per subscriber.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// A live subscription to one user's change topic.
///
/// Dropping the subscription unregisters it on the next publish to that
/// topic (the closed sender is reaped).
pub struct Subscription {
    /// Receiving end of the bounded per-subscriber queue.
    pub receiver: mpsc::Receiver<ChangeTag>,
    id: u64,
}

impl Subscription {
    /// Receive the next tag, or `None` once dropped by the broadcaster.
    pub async fn recv(&mut self) -> Option<ChangeTag> {
        self.receiver.recv().await
    }

    /// Opaque subscriber id, useful in logs.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<ChangeTag>,
}

/// Fan-out hub for per-user change tags.
///
/// Shared via `Arc<ChangeBroadcaster>` across the application; publishing
/// is synchronous and never awaits.
#[derive(Default)]
pub struct ChangeBroadcaster {
    topics: Mutex<HashMap<UserId, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl ChangeBroadcaster {
    /// Create an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one user's topic.
    pub fn subscribe(&self, user_id: UserId) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.topics.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        topics
            .entry(user_id)
            .or_default()
            .push(Subscriber { id, sender });

        debug!(user_id = %user_id, subscriber = id, "Registered change subscriber");
        Subscription { receiver, id }
    }

    /// Publish one tag to every subscriber of `user_id`.
    ///
    /// Subscribers whose queue is full or whose receiver has gone away are
    /// removed; the publisher never waits.
    pub fn publish(&self, user_id: UserId, tag: ChangeTag) {
        let mut topics = self.topics.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(subscribers) = topics.get_mut(&user_id) else {
            return;
        };

        subscribers.retain(|subscriber| match subscriber.sender.try_send(tag) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(
                    user_id = %user_id,
                    subscriber = subscriber.id,
                    "Dropping slow change subscriber"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if subscribers.is_empty() {
            topics.remove(&user_id);
        }
    }

    /// Publish several tags, preserving order per subscriber.
    pub fn publish_all(&self, user_id: UserId, tags: &[ChangeTag]) {
        for tag in tags {
            self.publish(user_id, *tag);
        }
    }

    /// Number of live subscribers for a user (test and diagnostics aid).
    #[must_use]
    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        let topics = self.topics.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        topics.get(&user_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let broadcaster = ChangeBroadcaster::new();
        let user = UserId::new();
        let mut sub = broadcaster.subscribe(user);

        broadcaster.publish(user, ChangeTag::Tasks);
        broadcaster.publish(user, ChangeTag::Metrics);

        assert_eq!(sub.recv().await, Some(ChangeTag::Tasks));
        assert_eq!(sub.recv().await, Some(ChangeTag::Metrics));
    }

    #[tokio::test]
    async fn test_topics_are_per_user() {
        let broadcaster = ChangeBroadcaster::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let mut alice_sub = broadcaster.subscribe(alice);
        let _bob_sub = broadcaster.subscribe(bob);

        broadcaster.publish(alice, ChangeTag::Daily);

        assert_eq!(alice_sub.recv().await, Some(ChangeTag::Daily));
        assert_eq!(broadcaster.subscriber_count(bob), 1);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_tag() {
        let broadcaster = ChangeBroadcaster::new();
        let user = UserId::new();

        let mut sub1 = broadcaster.subscribe(user);
        let mut sub2 = broadcaster.subscribe(user);

        broadcaster.publish(user, ChangeTag::Objectives);

        assert_eq!(sub1.recv().await, Some(ChangeTag::Objectives));
        assert_eq!(sub2.recv().await, Some(ChangeTag::Objectives));
    }

    #[test]
    fn test_publish_with_no_subscribers_does_not_panic() {
        let broadcaster = ChangeBroadcaster::new();
        broadcaster.publish(UserId::new(), ChangeTag::Weekly);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let broadcaster = ChangeBroadcaster::new();
        let user = UserId::new();
        let _sub = broadcaster.subscribe(user);

        // Fill the queue past capacity without draining.
        for _ in 0..=SUBSCRIBER_QUEUE_CAPACITY {
            broadcaster.publish(user, ChangeTag::Tasks);
        }

        assert_eq!(broadcaster.subscriber_count(user), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_reaped_on_publish() {
        let broadcaster = ChangeBroadcaster::new();
        let user = UserId::new();

        let sub = broadcaster.subscribe(user);
        drop(sub);

        broadcaster.publish(user, ChangeTag::Queries);
        assert_eq!(broadcaster.subscriber_count(user), 0);
    }

    #[tokio::test]
    async fn test_publish_all_preserves_order() {
        let broadcaster = ChangeBroadcaster::new();
        let user = UserId::new();
        let mut sub = broadcaster.subscribe(user);

        broadcaster.publish_all(user, &[ChangeTag::Metrics, ChangeTag::Daily]);

        assert_eq!(sub.recv().await, Some(ChangeTag::Metrics));
        assert_eq!(sub.recv().await, Some(ChangeTag::Daily));
    }
}
