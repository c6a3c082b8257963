//! HTTP clients for the two services that do the real work: the WhatsApp
//! gateway (instance lifecycle) and the workflow webhook (sending and
//! joining). Both are stateless wrappers over one `reqwest::Client`.

pub mod error;
pub mod gateway;
pub mod workflow;

pub use error::UpstreamError;
pub use gateway::{ConnectionState, CreatedInstance, GatewayApi, GatewayClient};
pub use workflow::{JoinGroupPayload, SendMessagePayload, WorkflowApi, WorkflowClient};
