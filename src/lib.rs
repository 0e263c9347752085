mod app;
mod render;
mod routes;
mod server;

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod detection;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod normalize;
pub mod ort_service;
pub mod retention;
pub mod router;
pub mod task;
pub mod telemetry;

pub use app::start_app;
