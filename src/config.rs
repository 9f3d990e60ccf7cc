//! Database connection configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CrudError, CrudResult};

/// PostgreSQL connection settings with serde-level defaults, so partial
/// configuration files work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgConfig {
    /// Database host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Database port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name.
    #[serde(default = "default_dbname")]
    pub dbname: String,
    /// Database user.
    #[serde(default = "default_user")]
    pub user: String,
    /// Database password.
    #[serde(default)]
    pub password: Option<String>,
    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "biorepo".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> usize {
    16
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for PgConfig {
    fn default() -> Self {
        PgConfig {
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl PgConfig {
    /// Builds a connection pool from these settings.
    pub fn create_pool(&self) -> CrudResult<deadpool_postgres::Pool> {
        let mut config = deadpool_postgres::Config::new();
        config.host = Some(self.host.clone());
        config.port = Some(self.port);
        config.dbname = Some(self.dbname.clone());
        config.user = Some(self.user.clone());
        config.password = self.password.clone();
        config.connect_timeout = Some(std::time::Duration::from_secs(self.connect_timeout_secs));
        config.pool = Some(deadpool_postgres::PoolConfig::new(self.max_connections));
        config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|err| CrudError::Configuration {
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: PgConfig = serde_json::from_str(r#"{"dbname": "biobank_test"}"#).unwrap();
        assert_eq!(config.dbname, "biobank_test");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_connections, 16);
    }

    #[tokio::test]
    async fn pool_builds_without_connecting() {
        let pool = PgConfig::default().create_pool().unwrap();
        assert_eq!(pool.status().max_size, 16);
    }
}
