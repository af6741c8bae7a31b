//! Request handler module
//!
//! Responsible for request routing dispatch and the CRUD operations on
//! configured resources.

pub mod resource;
pub mod router;

// Re-export main entry point
pub use router::handle_request;
