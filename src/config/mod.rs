//! Process configuration (NODE_ID environment variable)

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
