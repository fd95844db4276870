//! Backend services.
//!
//! # Data Flow
//! ```text
//! handler / auth stage
//!     → dispatcher.rs (breaker + retries around one logical call)
//!     → registry.rs (ServiceEntry: client, breaker, routes)
//!     → client.rs (one attempt over HTTP/JSON)
//!     → rpc.rs (envelope, RpcCode classification)
//! ```

pub mod client;
pub mod dispatcher;
pub mod registry;
pub mod rpc;

pub use client::{BackendClient, HttpBackend};
pub use dispatcher::Dispatcher;
pub use registry::{ServiceEntry, ServiceRegistry};
pub use rpc::{RpcCode, RpcError, RpcRequest, RpcResponse};
