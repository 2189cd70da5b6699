//! Remote tool invocation: transport, response normalisation and retries.

pub mod parse;
pub mod resilient;
pub mod transport;

pub use resilient::{BranchReport, CallReport, ResilientCaller};
pub use transport::{FailureClass, KnowledgeTransport, McpHttpTransport, TransportError};
