//! Shared types, error model, and configuration for the blackboard.
//!
//! This crate is the foundation depended on by all other blackboard crates.
//! It provides:
//! - [`BlackboardError`], the unified error type
//! - domain types ([`Plan`], [`Step`], [`Payload`], [`ResultRecord`], [`BlackboardSnapshot`])
//! - configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, FetchConfig, HousekeepingConfig, MAX_HOUSEKEEPING_INTERVAL_SECS,
    ObjectStoreOptions, StoreConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, validate_config,
    write_default_config,
};
pub use error::{BlackboardError, Result};
pub use types::{
    BlackboardSnapshot, ContextDescription, Payload, Plan, ResultRecord, Step, StepId, StepStatus,
};
