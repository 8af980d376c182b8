//! fc-control: the FlowCast control plane
//!
//! Wraps the engine behind a stream socket speaking length-delimited JSON
//! envelopes, as consumed by the `flowcast` daemon and by embedders that
//! want to drive a pipeline remotely.

mod controller;
mod envelope;
mod error;

pub use controller::*;
pub use envelope::*;
pub use error::*;
