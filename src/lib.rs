//! Custom field enrichment
//!
//! Turns the custom-field definitions of a scope into one derived value per
//! (definition, entity) pair and replaces the scope's previous output with
//! the new set in one unit.
//!
//! ```text
//! Scope -> FieldDefinitionSource -> CursorConverter -> ExpansionResolver -> ReplaceSink
//! ```
//!
//! Storage is reached only through the traits in [`source`], [`resolver`] and
//! [`sink`]. [`memory::MemoryStore`] implements all three in process; the
//! `database` feature adds the Postgres backend in `postgres`.

pub mod config;
pub mod converter;
pub mod error;
pub mod memory;
pub mod resolver;
pub mod sink;
pub mod source;
pub mod sql;
pub mod subtask;
pub mod types;

#[cfg(feature = "database")]
pub mod database;
#[cfg(feature = "database")]
pub mod postgres;

pub use config::{DatabaseConfig, EnricherConfig, TableConfig};
pub use converter::CursorConverter;
pub use error::{EnrichError, Result};
pub use memory::MemoryStore;
pub use resolver::ExpansionResolver;
pub use sink::{BatchWriter, ReplaceSink};
pub use source::FieldDefinitionSource;
pub use subtask::{SubtaskMeta, ENRICH_STORY_CUSTOM_FIELDS};
pub use types::{DerivedFieldValue, FieldDefinition, FieldValue, RunSummary, Scope, SourceEntity};
