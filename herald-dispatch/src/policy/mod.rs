//! Per-channel gating policy
//!
//! - [`DispatchPipeline`]: runs the breaker and limiter gates ahead of a
//!   transport call and feeds the outcome back into the breaker

pub mod pipeline;

pub use pipeline::DispatchPipeline;
