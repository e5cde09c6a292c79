//! Control plane
//!
//! Typed request/response API and the Unix-socket server the front end
//! drives the orchestrator through.

mod api;
mod handler;
mod server;

pub use api::{ApiError, ApiRequest, ApiResponse, ProvisionRequest};
pub use handler::RequestHandler;
pub use server::{ControlServer, DEFAULT_SOCKET_PATH};
