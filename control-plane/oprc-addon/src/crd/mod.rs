pub mod addon_config;

pub use addon_config::*;
