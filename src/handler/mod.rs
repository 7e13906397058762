//! Request handler module
//!
//! Request routing dispatch, static file serving, and the auxiliary
//! health/render/cache endpoints.

pub mod endpoints;
pub mod router;
pub mod static_files;

pub use router::handle_request;
