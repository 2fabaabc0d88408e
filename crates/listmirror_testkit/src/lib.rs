//! # listmirror testkit
//!
//! Test utilities for listmirror.
//!
//! This crate provides:
//! - Scenario fixtures over the in-memory list service
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use listmirror_testkit::prelude::*;
//!
//! #[test]
//! fn mirror_converges() {
//!     let fixture = MirrorFixture::new();
//!     fixture.set_source(subjects(10));
//!     fixture.run().unwrap();
//!     fixture.assert_converged();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
