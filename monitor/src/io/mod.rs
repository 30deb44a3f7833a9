//! I/O adapters for the promotion engine.

pub mod blob;
pub mod build_gateway;
pub mod config;
pub mod devops;
pub mod record_codec;
pub mod release_gateway;
pub mod secrets;
pub mod store;
