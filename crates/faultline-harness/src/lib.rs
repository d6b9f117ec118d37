//! Operational harness for faultline services.
//!
//! - **Throttle**: the block-cache and percentage-throttle decision used by
//!   the Auth/Throttle Gate.
//! - **Shutdown**: graceful drain coordination for the batch tier.

pub mod shutdown;
pub mod throttle;
