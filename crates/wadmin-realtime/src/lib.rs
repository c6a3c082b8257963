//! Change feed for the console. Every write to a collection is published
//! here and fanned out to the WebSocket connections that may see it.

pub mod connection;
pub mod feed;

pub use feed::{ChangeFeed, FeedMessage};
