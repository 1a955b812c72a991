//! HTTP surface: report creation and health endpoints.

pub mod api;
mod middleware;

pub use api::{ApiState, build_router};
