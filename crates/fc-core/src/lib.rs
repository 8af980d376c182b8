//! fc-core: frame model and queue primitives for FlowCast
//!
//! This crate provides the data-plane foundation shared by the whole
//! engine: the `Frame` value type, the lazy single-writer/multi-reader
//! `FrameQueue`, the `Reader`/`Writer` endpoints that filters own, and the
//! engine clock every timestamp is measured against.

mod error;
mod frame;
mod io;
mod queue;
mod time;

pub use error::*;
pub use frame::*;
pub use io::*;
pub use queue::*;
pub use time::*;
