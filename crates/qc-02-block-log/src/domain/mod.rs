//! # Domain Layer
//!
//! On-disk formats, configuration, errors and the pure pieces of the block
//! log. Nothing here touches the file system.

pub mod artifacts;
pub mod compression;
pub mod config;
pub mod errors;
pub mod frame;
pub mod metrics;
pub mod naming;
pub mod repair;
