//! YAML Loader module
//!
//! Parse engine definitions from YAML files.
//!
//! # Overview
//!
//! The loader module provides:
//! - `load_config` / `load_config_from_str` - read an [`EngineConfig`]
//! - Validation of thresholds, channel ids and router expressions

mod parser;

pub use parser::{load_config, load_config_from_str, validate_config};
