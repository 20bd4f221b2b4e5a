use std::fmt;

use serde::{Deserialize, Serialize};

/// Database connection parameters.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name.
    #[serde(rename = "db_name")]
    pub name: String,

    /// Role to connect as.
    #[serde(rename = "db_user")]
    pub user: String,

    /// Password for `user`.
    #[serde(rename = "db_password")]
    pub password: String,

    /// Server host.
    #[serde(rename = "db_host", default = "default_host")]
    pub host: String,

    /// Server port.
    #[serde(rename = "db_port", default = "default_port")]
    pub port: u16,

    /// Statement timeout in seconds applied to the session. Unset means none.
    #[serde(default)]
    pub statement_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            user: String::new(),
            password: String::new(),
            host: default_host(),
            port: default_port(),
            statement_timeout_secs: None,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("statement_timeout_secs", &self.statement_timeout_secs)
            .finish()
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_database_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert!(config.statement_timeout_secs.is_none());
    }

    #[test]
    fn test_parse_database_config() {
        let toml = r#"
            db_name = "helpdesk"
            db_user = "postgres"
            db_password = "hunter2"
            db_port = 54322
        "#;

        let config: DatabaseConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.name, "helpdesk");
        assert_eq!(config.port, 54322);
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DatabaseConfig {
            password: "hunter2".into(),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }
}
