//! Application services: report rendering and the errors it surfaces.

pub mod error;
pub mod render;
