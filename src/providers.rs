//! Queue seam implementations.

pub mod memory;
pub mod sqs;
