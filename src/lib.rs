//! Report Press: chunked, two-phase parallel PDF report rendering.
//!
//! Large paginated statements are split into bounded render units, converted
//! concurrently by an external HTML-to-PDF service, merged back in a stable
//! order and, on request, stamped with "page N of M" footers in a second pass.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
