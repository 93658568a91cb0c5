//! # Ferry Testkit
//!
//! Test utilities for Ferry.
//!
//! This crate provides:
//! - Fixtures: sample records, preconfigured engines, a full coordinator stack
//! - Fakes: record sources, sinks, record stores and data stores with fault injection
//! - Property-based test generators using proptest
//! - Stress helpers for concurrent outbox use
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ferry_testkit::prelude::*;
//!
//! #[test]
//! fn migrates_everything() {
//!     let engine = TestEngine::new();
//!     let sink = Arc::new(FaultySink::new());
//!     let source = Arc::new(VecSource::new(sample_records(250, 16)));
//!     let outcome = engine.start(source, sink.clone(), test_options("job", 100)).unwrap().wait();
//!     assert!(outcome.is_completed());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fakes;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
