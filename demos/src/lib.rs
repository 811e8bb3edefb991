//! # tsync demos
//!
//! Simulations that drive tsync timelines from threads standing in for
//! hardware and client processes.
//!
//! ## Available Demos
//!
//! - `fence_demo` - Hardware contexts and an explicit timeline waited on by
//!   one consumer

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
