pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod mail;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod redis;
pub mod state;
pub mod stats;
pub mod validation;

pub use config::Config;
pub use error::{AppError, Result};
pub use pipeline::SendPipeline;
pub use state::AppState;
