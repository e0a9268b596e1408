//! Request handler module
//!
//! Routes specialization requests to the engine and everything else to the
//! active user function.

pub mod router;

// Re-export main entry point
pub use router::handle_request;
