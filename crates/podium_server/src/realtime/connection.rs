use podium_core::notify::RealtimeMessage;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::WebsiteChannel;

/// One connected builder listening on a website's channel.
pub struct Subscriber {
    channel: Arc<WebsiteChannel>,
    rx: broadcast::Receiver<RealtimeMessage>,
}

impl Subscriber {
    pub(crate) fn new(channel: Arc<WebsiteChannel>) -> Self {
        let rx = channel.subscribe();
        Self { channel, rx }
    }

    pub fn website_id(&self) -> i64 {
        self.channel.website_id()
    }

    /// Next message for this subscriber, `None` once the channel closes.
    ///
    /// Messages missed while lagging are skipped; delivery is best-effort.
    pub async fn recv(&mut self) -> Option<RealtimeMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        "Subscriber of website {} lagged, {} messages skipped",
                        self.website_id(),
                        n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// A message if one is ready.
    pub fn try_recv(&mut self) -> Option<RealtimeMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.channel.unsubscribe();
        debug!("Subscriber left website {}", self.website_id());
    }
}
