//! Status store implementations

pub mod memory;

pub use memory::InMemoryStatusStore;
