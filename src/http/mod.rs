//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layer order)
//!     → middleware.rs (CORS, compression, throttle, panics)
//!     → request.rs (request id, RequestContext, deadline)
//!     → handlers.rs (body + params → RpcRequest → Dispatcher)
//!     → response.rs (GatewayError → status + JSON body)
//!     → Send to client
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use handlers::AppState;
pub use request::{Identity, RequestContext, RequestId, X_REQUEST_ID};
pub use response::ApiError;
pub use server::{build_router, GatewayParts, GatewayServer};
