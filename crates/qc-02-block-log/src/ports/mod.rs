//! # Ports
//!
//! - `inbound`: the API the block log offers to chain-state logic
//! - `outbound`: collaborators the block log depends on

pub mod inbound;
pub mod outbound;
