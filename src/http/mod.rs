//! HTTP protocol layer module
//!
//! Response builders shared by the control endpoints and the invocation path.

pub mod response;

// Re-export commonly used types
pub use response::{build_202_response, build_400_response, build_413_response, build_500_response};
