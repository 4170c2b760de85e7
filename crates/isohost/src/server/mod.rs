//! HTTP front end
//!
//! Exposes the instance registry over plain HTTP query-string routes.

mod handler;
mod protocol;
mod router;
mod state;

pub use handler::*;
pub use protocol::*;
pub use router::*;
pub use state::*;
