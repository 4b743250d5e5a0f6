pub mod auth;
pub mod registry;

pub use auth::{CourierAuthenticator, TokenTable};
pub use registry::{BroadcastReport, ConnectionRegistry, Payload, Registration, SendOutcome};
