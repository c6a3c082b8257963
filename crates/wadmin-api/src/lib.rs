pub mod admin;
pub mod auth;
pub mod dashboard;
pub mod dispatch;
pub mod error;
pub mod groups;
pub mod instances;
pub mod messages;
pub mod middleware;
pub mod reachability;
pub mod reconciler;
pub mod registry;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner};
