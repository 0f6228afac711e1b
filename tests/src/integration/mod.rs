//! # Integration Scenarios
//!
//! End-to-end publish flows through `LocalEventBus`.

pub mod cancellation;
pub mod dispatch;
