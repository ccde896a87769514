pub mod client;
pub mod discovery;
pub mod types;

pub use client::{HomeApi, HomeAssistantClient};
pub use discovery::Discovery;
pub use types::{entity_domain, EntityRecord, ServiceCall, ServiceDescriptor, ServiceField};
