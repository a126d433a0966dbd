//! Process settings loaded from environment variables.
//!
//! Uses `dotenvy` to load `.env` files and provides typed configuration.

use anyhow::{Context, Result};
use secrecy::SecretString;

/// Default SQLite database file.
const DEFAULT_DATABASE_PATH: &str = "waypoint.db";

/// Application settings loaded from environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Server configuration
    pub server: ServerSettings,
    /// Path to the SQLite database file
    pub database_path: String,
    /// Encryption key for credentials at rest (64 hex chars)
    pub encryption_key: SecretString,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Seconds to wait for in-flight work on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Loads `.env` file if present, then reads from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// malformed.
    pub fn from_env() -> Result<Self> {
        // Load .env file (ignore if not present)
        let _ = dotenvy::dotenv();

        let server = ServerSettings {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            shutdown_timeout_secs: std::env::var("SHUTDOWN_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("SHUTDOWN_TIMEOUT_SECS must be a valid number")?,
        };

        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());

        let encryption_key = SecretString::from(
            std::env::var("ENCRYPTION_KEY").context("ENCRYPTION_KEY is required")?,
        );

        Ok(Self {
            server,
            database_path,
            encryption_key,
        })
    }

    /// Get the server address string (host:port).
    #[must_use]
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// SQLite connection URL, creating the file on first connect.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_settings_default() {
        let settings = ServerSettings::default();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 3000);
    }

    #[test]
    fn test_database_url() {
        let settings = Settings {
            server: ServerSettings::default(),
            database_path: "/tmp/waypoint-test.db".to_string(),
            encryption_key: SecretString::from("unused".to_string()),
        };
        assert_eq!(
            settings.database_url(),
            "sqlite:///tmp/waypoint-test.db?mode=rwc"
        );
    }
}
