//! Gateway server implementation

mod handler;
mod router;
mod server;
mod upstream;

pub use handler::AuthGateway;
pub use router::create_router;
pub use server::Gateway;
pub use upstream::{HttpUpstream, Upstream};
