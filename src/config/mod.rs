// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML data model and its defaults.
//! - `loader.rs`: reading `taskgrid.toml` from disk.
//! - `validate.rs`: `RawConfigFile -> ConfigFile` with range checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{ClaimSection, ConfigFile, LockSection, RawConfigFile, ReclaimSection};
