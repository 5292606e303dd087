//! Listing-draft sessions: data model, state machine, per-sender dispatch.

pub mod dispatcher;
pub mod machine;
pub mod model;
pub mod replies;
pub mod routes;
pub mod state;
pub mod sweep;

pub use dispatcher::{Dispatcher, Workflow};
pub use model::Session;
pub use state::SessionState;
