pub mod endpoint;
pub mod messages;

pub use endpoint::EndpointKind;
pub use messages::{ClientFrame, ServerFrame, ServerSummary};
