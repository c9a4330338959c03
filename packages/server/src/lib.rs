//! HTTP surface for the connection-harvest workflow engine.
//!
//! `kernel` holds the dependency container and the development fallbacks
//! for the external collaborators; `server` holds the axum application,
//! middleware, routes, and the request controller.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::Config;
