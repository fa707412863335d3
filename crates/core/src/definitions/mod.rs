//! Definition source port and definition validation

pub mod ports;
pub mod validation;

pub use ports::DefinitionSource;
pub use validation::validate_definition;
