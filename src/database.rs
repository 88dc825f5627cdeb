//! Database connection management

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Create a connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        "Connecting to database: {}",
        mask_database_url(&config.database_url)
    );

    let mut pool_options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connection_timeout);

    if let Some(idle_timeout) = config.idle_timeout {
        pool_options = pool_options.idle_timeout(idle_timeout);
    }

    if let Some(max_lifetime) = config.max_lifetime {
        pool_options = pool_options.max_lifetime(max_lifetime);
    }

    let pool = pool_options
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            warn!("Failed to connect to database: {}", e);
            e
        })?;

    info!("Database connection pool created successfully");
    Ok(pool)
}

/// Mask sensitive information in database URL for logging
pub fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else if url.chars().count() > 20 {
        let head: String = url.chars().take(10).collect();
        let mut tail: Vec<char> = url.chars().rev().take(10).collect();
        tail.reverse();
        format!("{head}***{}", tail.into_iter().collect::<String>())
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        let masked = mask_database_url("postgresql://lake:secret@db:5432/devlake");
        assert!(!masked.contains("secret"));
        assert!(masked.contains("***"));
    }

    #[test]
    fn test_unparseable_url_masked_on_char_boundaries() {
        let masked = mask_database_url("ünïcödé host sëcrët pässwörd dätäbäsé");
        assert_eq!(masked, "ünïcödé ho***d dätäbäsé");
    }

    #[test]
    fn test_url_without_password_unchanged() {
        assert_eq!(
            mask_database_url("postgresql://db:5432/devlake"),
            "postgresql://db:5432/devlake"
        );
    }
}
