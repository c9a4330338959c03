// HTTP server setup (Axum)
pub mod app;
pub mod controller;
pub mod middleware;
pub mod routes;

pub use app::*;
pub use controller::*;
