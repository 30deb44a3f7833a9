//! Nightly promotion monitor.
//!
//! Once a day the monitor waits for an upstream validation pipeline to
//! succeed, queues the downstream build for the same commit, watches it, then
//! creates and watches one release per configured release definition. Progress
//! lives in one JSON record per UTC date, persisted after every tick.
//!
//! - **[`core`]**: Pure record types, the state → action table and the
//!   transitions applied to observed remote state. No I/O.
//! - **[`io`]**: Config, record codec and stores, Azure DevOps and Azure Blob
//!   clients. Gateways are traits so tests can script them.
//!
//! [`engine`] runs one tick; [`looping`] runs ticks on an interval.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
