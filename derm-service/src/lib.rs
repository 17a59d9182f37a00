pub mod config;
pub mod models;
pub mod service;

pub use config::{LogFormat, ServiceConfig};
pub use service::{AppState, create_app, create_app_state};
