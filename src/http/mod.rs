//! HTTP surface for the admission controller.

mod handlers;
mod server;

pub use handlers::{HttpOptions, IdentityQuery, ResourceBody, ServiceState, StatusBody};
pub use server::{router, HttpServer};
