use podium_core::notify::{ChangeNotification, ChangeNotifier, RealtimeMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::Subscriber;

const CHANNEL_CAPACITY: usize = 256;

/// Statistics about open channels
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub active_connections: usize,
    pub active_channels: usize,
}

/// The broadcast channel of one website.
pub struct WebsiteChannel {
    website_id: i64,
    tx: broadcast::Sender<RealtimeMessage>,
    subscriber_count: AtomicUsize,
}

impl WebsiteChannel {
    fn new(website_id: i64) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            website_id,
            tx,
            subscriber_count: AtomicUsize::new(0),
        }
    }

    pub fn website_id(&self) -> i64 {
        self.website_id
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        self.tx.subscribe()
    }

    pub(crate) fn unsubscribe(&self) {
        self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Hand `message` to every current subscriber.
    pub fn publish(&self, message: RealtimeMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }
}

/// All website channels, created on first subscription.
#[derive(Default)]
pub struct ChannelHub {
    channels: RwLock<HashMap<i64, Arc<WebsiteChannel>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a website's channel, creating it if needed.
    pub fn subscribe(&self, website_id: i64) -> Subscriber {
        let channel = {
            let mut channels = self.channels.write().unwrap();
            channels
                .entry(website_id)
                .or_insert_with(|| {
                    info!("Opened realtime channel for website {}", website_id);
                    Arc::new(WebsiteChannel::new(website_id))
                })
                .clone()
        };
        Subscriber::new(channel)
    }

    /// Drop the channel of a website if nobody listens anymore.
    pub fn remove_if_idle(&self, website_id: i64) {
        let mut channels = self.channels.write().unwrap();
        if let Some(channel) = channels.get(&website_id) {
            if channel.subscriber_count() == 0 {
                channels.remove(&website_id);
                debug!("Closed idle realtime channel for website {}", website_id);
            }
        }
    }

    /// Drop every channel nobody listens to. Returns how many were closed.
    pub fn prune_idle(&self) -> usize {
        let mut channels = self.channels.write().unwrap();
        let before = channels.len();
        channels.retain(|_, channel| channel.subscriber_count() > 0);
        before - channels.len()
    }

    pub fn subscriber_count(&self, website_id: i64) -> usize {
        let channels = self.channels.read().unwrap();
        channels
            .get(&website_id)
            .map(|c| c.subscriber_count())
            .unwrap_or(0)
    }

    /// Get statistics about open channels
    pub fn get_stats(&self) -> HubStats {
        let channels = self.channels.read().unwrap();
        HubStats {
            active_connections: channels.values().map(|c| c.subscriber_count()).sum(),
            active_channels: channels.len(),
        }
    }
}

impl ChangeNotifier for ChannelHub {
    fn notify(&self, website_id: i64, event: ChangeNotification) -> usize {
        let channel = {
            let channels = self.channels.read().unwrap();
            channels.get(&website_id).cloned()
        };
        // Nobody subscribed: the event is lost, clients resync on reload
        let Some(channel) = channel else {
            debug!(
                "No subscribers for website {}, dropping {} update",
                website_id, event.prop_name
            );
            return 0;
        };
        channel.publish(RealtimeMessage::BlockImageProcessed(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(block_id: &str) -> ChangeNotification {
        ChangeNotification {
            block_id: block_id.to_string(),
            prop_name: "imageUrl".to_string(),
            image_url: "http://localhost/storage/blocks/1/42/a.png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_subscribers_of_that_website_only() {
        let hub = ChannelHub::new();
        let mut first = hub.subscribe(1);
        let mut second = hub.subscribe(1);
        let mut other = hub.subscribe(2);

        assert_eq!(hub.notify(1, event("42")), 2);

        for subscriber in [&mut first, &mut second] {
            match subscriber.recv().await {
                Some(RealtimeMessage::BlockImageProcessed(e)) => assert_eq!(e.block_id, "42"),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn test_notify_without_subscribers_is_dropped() {
        let hub = ChannelHub::new();
        assert_eq!(hub.notify(9, event("1")), 0);
    }

    #[test]
    fn test_drop_unsubscribes_and_idle_channels_close() {
        let hub = ChannelHub::new();
        let subscriber = hub.subscribe(3);
        assert_eq!(hub.subscriber_count(3), 1);
        assert_eq!(hub.get_stats().active_channels, 1);

        hub.remove_if_idle(3);
        assert_eq!(hub.get_stats().active_channels, 1);

        drop(subscriber);
        assert_eq!(hub.subscriber_count(3), 0);
        hub.remove_if_idle(3);
        assert_eq!(hub.get_stats().active_channels, 0);
    }

    #[test]
    fn test_prune_idle_keeps_channels_with_listeners() {
        let hub = ChannelHub::new();
        let kept = hub.subscribe(1);
        drop(hub.subscribe(2));
        drop(hub.subscribe(3));
        assert_eq!(hub.get_stats().active_channels, 3);

        assert_eq!(hub.prune_idle(), 2);
        assert_eq!(hub.get_stats().active_channels, 1);
        assert_eq!(hub.subscriber_count(1), 1);

        drop(kept);
        assert_eq!(hub.prune_idle(), 1);
        assert_eq!(hub.prune_idle(), 0);
    }
}
