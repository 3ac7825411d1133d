//! # Blocksync Testkit
//!
//! Test utilities for blocksync.
//!
//! This crate provides:
//! - Fixtures: a seeded in-memory server and block builders
//! - A harness wiring a sync session to the server over a loopback transport
//! - Property-based edit script generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blocksync_testkit::prelude::*;
//!
//! #[test]
//! fn edits_reach_the_server() {
//!     let mut harness = SyncHarness::new();
//!     harness.create(0, "hello");
//!     harness.sync_until_idle();
//!     assert_eq!(harness.server_contents().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
