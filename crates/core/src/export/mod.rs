//! Export sink port

pub mod ports;

pub use ports::{Sink, SinkMode};
