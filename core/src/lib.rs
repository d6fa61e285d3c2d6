//! Core types and the concurrent multi-host dispatcher shared by the protocol clients.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod params;

pub use client::{find_operation, OperationInfo, ProtocolClient};
pub use dispatcher::{Dispatcher, Outcome, Report, DEFAULT_WORKERS};
pub use error::DispatchError;
pub use params::{Params, Payload};
pub use tokio_util::sync::CancellationToken;
