//! Client-side builder session.
//!
//! A [`BuilderSession`] is created when a builder opens and dropped when it
//! closes. It owns the editable block list, the undo/redo history and the
//! save state machine, and talks to the server only through [`BuilderApi`].

mod api;
mod builder;
mod history;

pub use api::{BoxFuture, BuilderApi, BuilderData, PublishResponse, SaveRequest, SaveResponse};
pub use builder::{BuilderSession, EditBuffer, SaveState, SessionConfig, SessionStatus};
pub use history::{DEFAULT_HISTORY_CAP, History};
