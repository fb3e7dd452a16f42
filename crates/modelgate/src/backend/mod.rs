//! Backend module: registry/router and connection pool.

pub mod pool;
pub mod registry;

pub use pool::{BackendCaller, ConnectionPool, RawResponse};
pub use registry::BackendRegistry;
