//! # Local Bus Test Suite
//!
//! Unified test crate exercising the bus through its public API only.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Shared handlers and probes
//! └── integration/
//!     ├── dispatch.rs      # Fan-out, failure isolation, unsubscribe
//!     ├── ordering.rs      # Sequential chains and priorities
//!     ├── cancellation.rs  # Pre-start and mid-dispatch cancellation, deadlines
//!     └── serialization.rs # Provider chain and external envelopes
//! tests/benches/
//! └── dispatch_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p bus-tests
//!
//! # By category
//! cargo test -p bus-tests integration::cancellation::
//!
//! # Benchmarks
//! cargo bench -p bus-tests
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod integration;
