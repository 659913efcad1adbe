//! # Configuration Module
//!
//! Engine configuration and the parsing helpers the CLI builds it from.

pub mod config;

pub use config::{DecoderConfig, parse_size, parse_timeout};
