//! Frontend listener and request routing.
//!
//! This module accepts client connections, serves HTTP/1.1 on them and routes
//! each request to a live backend.

mod listener;
mod router;

pub use listener::FrontendListener;
pub use router::{DEFAULT_MAX_BODY_SIZE, RequestRouter, error_response};
