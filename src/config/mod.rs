//! Configuration Module

pub mod loader;
pub mod types;

pub use loader::{ConfigError, ConfigLoader};
pub use types::{
    ChannelConfig, ComponentConfig, FilterConfig, FilterStage, FlowConfig, Options, RuntimeConfig,
};
