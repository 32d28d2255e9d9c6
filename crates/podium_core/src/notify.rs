//! Change notifications pushed to builders after an upload commits.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Event name carried by a processed-image notification.
pub const EVENT_BLOCK_IMAGE_PROCESSED: &str = "block.image.processed";

/// A single prop of a single block received its final value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ChangeNotification {
    pub block_id: String,
    pub prop_name: String,
    /// Absolute URL of the stored file, built from the final reference by
    /// the owning backend. The block itself stores the relative reference;
    /// the server turns this URL back into it when the block is re-saved.
    pub image_url: String,
}

/// Text frames sent over a website's realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RealtimeMessage {
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "websiteId")]
        website_id: i64,
    },
    #[serde(rename = "block.image.processed")]
    BlockImageProcessed(ChangeNotification),
}

impl RealtimeMessage {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Outbound side of the realtime channel.
///
/// Delivery is best-effort: clients that are not subscribed when the event is
/// published never see it.
pub trait ChangeNotifier: Send + Sync {
    /// Publish to every client subscribed to `website_id`. Returns how many
    /// subscribers the event was handed to.
    fn notify(&self, website_id: i64, event: ChangeNotification) -> usize;
}

/// A notifier that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _website_id: i64, _event: ChangeNotification) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_processed_frame_shape() {
        let msg = RealtimeMessage::BlockImageProcessed(ChangeNotification {
            block_id: "42".into(),
            prop_name: "imageUrl".into(),
            image_url: "http://localhost:3040/storage/block-images/3/42/imageUrl-1.png".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], json!(EVENT_BLOCK_IMAGE_PROCESSED));
        assert_eq!(value["blockId"], json!("42"));
        assert_eq!(value["propName"], json!("imageUrl"));

        assert_eq!(RealtimeMessage::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_subscribed_frame_shape() {
        let text = RealtimeMessage::Subscribed { website_id: 3 }.to_json().unwrap();
        assert_eq!(text, r#"{"event":"subscribed","websiteId":3}"#);
    }
}
