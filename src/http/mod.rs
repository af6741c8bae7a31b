//! HTTP protocol layer module
//!
//! Response builders, decoupled from the resource handlers.

pub mod response;

// Re-export commonly used builders
pub use response::{
    build_413_response, build_error_detail_response, build_error_response,
    build_health_response, build_json_response, build_route_not_found_response,
};
