//! Definition sources

pub mod file;
pub mod memory;

pub use file::{parse_definition, FileDefinitionSource, LoadedDefinition};
pub use memory::InMemoryDefinitionSource;
