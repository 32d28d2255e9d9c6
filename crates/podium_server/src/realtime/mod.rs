//! Per-website realtime channels.
//!
//! Upload workers publish [`ChangeNotification`](podium_core::notify::ChangeNotification)s
//! through the [`ChannelHub`]; each websocket connection holds a
//! [`Subscriber`] on the channel of the website it opened.

mod connection;
mod hub;

pub use connection::Subscriber;
pub use hub::{ChannelHub, HubStats, WebsiteChannel};
