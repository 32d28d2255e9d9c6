use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::ClientConfig;
use crate::error::{PodiumError, Result};
use crate::notify::{ChangeNotification, RealtimeMessage};

/// A live subscription to one website's realtime channel.
pub struct ChannelSubscription {
    website_id: i64,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ChannelSubscription {
    /// Connect and wait for the server's subscription acknowledgment.
    pub async fn connect(config: &ClientConfig, website_id: i64) -> Result<Self> {
        let url = url::Url::parse(&config.channel_url(website_id))
            .map_err(|e| PodiumError::Validation(format!("invalid channel url: {}", e)))?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| PodiumError::Network(e.to_string()))?;

        let mut subscription = Self { website_id, stream };
        match subscription.next_message().await? {
            Some(RealtimeMessage::Subscribed { .. }) => {
                log::debug!("subscribed to website {}", website_id);
                Ok(subscription)
            }
            other => Err(PodiumError::Network(format!(
                "expected subscription acknowledgment, got {:?}",
                other
            ))),
        }
    }

    pub fn website_id(&self) -> i64 {
        self.website_id
    }

    /// Next frame from the server, `None` once the channel is closed.
    pub async fn next_message(&mut self) -> Result<Option<RealtimeMessage>> {
        while let Some(frame) = self.stream.next().await {
            match frame.map_err(|e| PodiumError::Network(e.to_string()))? {
                Message::Text(text) => return RealtimeMessage::from_json(text.as_str()).map(Some),
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Next change notification, skipping control frames.
    pub async fn next_notification(&mut self) -> Result<Option<ChangeNotification>> {
        loop {
            match self.next_message().await? {
                Some(RealtimeMessage::BlockImageProcessed(event)) => return Ok(Some(event)),
                Some(RealtimeMessage::Subscribed { .. }) => continue,
                None => return Ok(None),
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| PodiumError::Network(e.to_string()))
    }
}
