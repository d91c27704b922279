//! Service layer

pub mod backend;
pub mod extractor;
pub mod manifest;
pub mod pipeline;
pub mod response_cache;
