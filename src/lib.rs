pub mod metric;
pub mod row;

/// How metrics come into the pipeline.
pub mod recv;

pub use recv::{Builder, Collector, Error, Opt, Receiver};
