//! HTTP layer: worker control-plane routes and auth middleware

pub mod middleware;
pub mod routes;

pub use routes::build_worker_router;
