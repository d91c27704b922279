//! Shared helpers

pub mod fs;
pub mod request_logger;

pub use fs::{fingerprint, remove_if_exists, write_atomic};
pub use request_logger::RequestLogger;
