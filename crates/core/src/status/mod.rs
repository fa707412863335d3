//! Status store port

pub mod ports;

pub use ports::StatusStore;
