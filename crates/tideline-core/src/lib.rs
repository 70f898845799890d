//! tideline-core: shared types and configuration for Tideline.
//!
//! Everything here is free of I/O beyond reading the config file, so every
//! other crate in the workspace can depend on it.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{
    AggregationPolicy, ConfigError, EngineConfig, MetricsConfig, ScaleConfig, ScalingRulesConfig,
    TidelineConfig, WorkloadConfig,
};
pub use duration::{parse_duration, DurationError};
pub use types::*;
