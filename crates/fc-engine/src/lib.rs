//! fc-engine: the FlowCast dataflow engine
//!
//! Composes media filters into dynamically reconfigurable pipelines:
//! - filter shapes over one payload hook each (`shapes`)
//! - master/slave fan-out with zero-copy frame lending (`group`)
//! - a fixed workers pool with earliest-deadline scheduling (`pool`)
//! - paths and the pipeline manager with its control-plane dispatch
//!   (`path`, `pipeline`)
//! - loopback collaborators standing in for codec bindings (`loopback`)

// Connection plumbing passes several ids per call
#![allow(clippy::too_many_arguments)]

mod error;
mod event;
mod factory;
mod filter;
mod group;
mod loopback;
mod path;
mod pipeline;
mod pool;
mod shapes;

pub use error::*;
pub use event::*;
pub use factory::*;
pub use filter::*;
pub use group::*;
pub use loopback::*;
pub use path::*;
pub use pipeline::*;
pub use pool::*;
pub use shapes::*;
