//! Native client for the builder API and the realtime channel.
//!
//! Only available with the `native-client` feature.

mod channel;
mod http;

pub use channel::ChannelSubscription;
pub use http::HttpBuilderApi;

use std::time::Duration;

use crate::session::SessionConfig;

/// Connection and timing settings of a native builder client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// e.g. `http://localhost:3040`
    pub base_url: String,
    /// Bearer session token.
    pub token: Option<String>,
    pub auto_save_interval: Duration,
    pub saved_display_delay: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let session = SessionConfig::default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            auto_save_interval: session.auto_save_interval,
            saved_display_delay: session.saved_display_delay,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            auto_save_interval: self.auto_save_interval,
            saved_display_delay: self.saved_display_delay,
            ..SessionConfig::default()
        }
    }

    /// Realtime channel URL of a website.
    pub fn channel_url(&self, website_id: i64) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        match &self.token {
            Some(token) => format!("{}/ws/websites/{}?token={}", base, website_id, token),
            None => format!("{}/ws/websites/{}", base, website_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url() {
        let config = ClientConfig::new("http://localhost:3040/").with_token("abc");
        assert_eq!(
            config.channel_url(3),
            "ws://localhost:3040/ws/websites/3?token=abc"
        );
        let config = ClientConfig::new("https://podium.example");
        assert_eq!(config.channel_url(3), "wss://podium.example/ws/websites/3");
    }
}
