mod alert;
mod dispatch;
mod frames;
mod model_service;
mod notifier;
mod ort_service;
mod routes;
mod scorer;
mod server;
mod storage;
mod telemetry;
mod video;

pub mod app;
pub mod config;

pub use app::start_app;
