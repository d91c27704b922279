//! Configuration loading and validation

mod app_config;

pub use app_config::*;
