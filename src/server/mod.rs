mod connections;
mod http;

pub use connections::{ConnectionGuard, ConnectionTable};
pub use http::{media_router, MediaServer};
