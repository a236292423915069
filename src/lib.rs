//! Logical block namespace utility.
//!
//! Enumerate logical-block-addressed namespaces, read their identification
//! data, and move raw data plus optional out-of-band metadata across a
//! logical block range. Each process invocation executes exactly one
//! operation: buffers are sized from the namespace geometry, the command is
//! submitted once through the device-access layer, and the dual-channel
//! outcome (host error vs. device-reported completion status) decides the
//! exit code.

pub mod buffer;
pub mod device;
pub mod enumerate;
pub mod error;
pub mod geometry;
pub mod identify;
pub mod ops;
pub mod report;
pub mod sink;

pub use error::{Error, Result};
