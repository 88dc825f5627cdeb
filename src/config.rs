//! Enricher configuration
//!
//! Reads settings from environment variables, falling back to defaults that
//! match the stock story tables.

use std::time::Duration;

use crate::error::{EnrichError, Result};
use crate::sink::DEFAULT_BATCH_SIZE;

/// Upper bound on records per insert; six bind parameters per row must stay
/// under the Postgres limit of 65535.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Connections one run holds at once: the replace transaction, the
/// definition cursor and the entity page read.
pub const MIN_POOL_SIZE: u32 = 3;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost:5432/devlake".to_string(),
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }
}

/// Physical names of the tables and columns the enricher touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub schema: String,
    pub definitions_table: String,
    /// Column on the definitions table naming the entity column.
    pub definition_field_column: String,
    /// Column on the definitions table holding the display name.
    pub definition_name_column: String,
    /// Soft-delete marker; rows where it is non-null are skipped.
    pub definition_deleted_column: Option<String>,
    pub entities_table: String,
    pub entity_id_column: String,
    pub output_table: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            definitions_table: "tapd_story_custom_fields".to_string(),
            definition_field_column: "custom_field".to_string(),
            definition_name_column: "name".to_string(),
            definition_deleted_column: None,
            entities_table: "tapd_stories".to_string(),
            entity_id_column: "id".to_string(),
            output_table: "tapd_story_custom_field_values".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnricherConfig {
    pub batch_size: usize,
    pub tables: TableConfig,
    pub database: DatabaseConfig,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tables: TableConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl EnricherConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database.database_url = url;
        }
        if let Some(size) = lookup("DATABASE_POOL_SIZE") {
            config.database.max_connections = parse("DATABASE_POOL_SIZE", &size)?;
        }
        if let Some(size) = lookup("ENRICHER_BATCH_SIZE") {
            config.batch_size = parse("ENRICHER_BATCH_SIZE", &size)?;
        }

        let tables = &mut config.tables;
        if let Some(schema) = lookup("ENRICHER_SCHEMA") {
            tables.schema = schema;
        }
        if let Some(table) = lookup("ENRICHER_DEFINITIONS_TABLE") {
            tables.definitions_table = table;
        }
        if let Some(column) = lookup("ENRICHER_DEFINITIONS_DELETED_COLUMN") {
            tables.definition_deleted_column = Some(column).filter(|c| !c.is_empty());
        }
        if let Some(table) = lookup("ENRICHER_ENTITIES_TABLE") {
            tables.entities_table = table;
        }
        if let Some(table) = lookup("ENRICHER_OUTPUT_TABLE") {
            tables.output_table = table;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(EnrichError::Config(format!(
                "batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.database.max_connections < MIN_POOL_SIZE {
            return Err(EnrichError::Config(format!(
                "DATABASE_POOL_SIZE must be at least {MIN_POOL_SIZE}, got {}",
                self.database.max_connections
            )));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| EnrichError::Config(format!("{key} is not a valid number: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = EnricherConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.tables, TableConfig::default());
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_overrides() {
        let config = EnricherConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgresql://db/lake"),
            ("ENRICHER_BATCH_SIZE", "250"),
            ("ENRICHER_SCHEMA", "lake"),
            ("ENRICHER_DEFINITIONS_DELETED_COLUMN", "deleted_at"),
            ("ENRICHER_OUTPUT_TABLE", "story_field_values"),
        ]))
        .unwrap();

        assert_eq!(config.database.database_url, "postgresql://db/lake");
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.tables.schema, "lake");
        assert_eq!(
            config.tables.definition_deleted_column.as_deref(),
            Some("deleted_at")
        );
        assert_eq!(config.tables.output_table, "story_field_values");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = EnricherConfig::from_lookup(lookup(&[("ENRICHER_BATCH_SIZE", "0")])).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let err =
            EnricherConfig::from_lookup(lookup(&[("ENRICHER_BATCH_SIZE", "20000")])).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_non_numeric_pool_size_rejected() {
        let err =
            EnricherConfig::from_lookup(lookup(&[("DATABASE_POOL_SIZE", "many")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_POOL_SIZE"));
    }

    #[test]
    fn test_pool_too_small_for_one_run_rejected() {
        let err = EnricherConfig::from_lookup(lookup(&[("DATABASE_POOL_SIZE", "2")])).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("at least 3"));

        let config = EnricherConfig::from_lookup(lookup(&[("DATABASE_POOL_SIZE", "3")])).unwrap();
        assert_eq!(config.database.max_connections, MIN_POOL_SIZE);
    }

    #[test]
    fn test_empty_deleted_column_means_none() {
        let config = EnricherConfig::from_lookup(lookup(&[(
            "ENRICHER_DEFINITIONS_DELETED_COLUMN",
            "",
        )]))
        .unwrap();
        assert_eq!(config.tables.definition_deleted_column, None);
    }
}
