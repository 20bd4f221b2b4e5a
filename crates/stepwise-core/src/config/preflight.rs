use serde::{Deserialize, Serialize};

/// Pre-flight check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Fraction of `max_connections` above which the connection check fails.
    #[serde(default = "default_max_connection_usage")]
    pub max_connection_usage: f64,

    /// Database size above which the size check fails. Unset means the
    /// check only reports sizes.
    #[serde(default)]
    pub max_database_size_mb: Option<u64>,

    /// Roles the migration grants to or references.
    #[serde(default)]
    pub required_roles: Vec<String>,

    /// Tables the migration references (e.g. foreign key targets).
    #[serde(default)]
    pub required_tables: Vec<String>,

    /// Extensions the migration relies on.
    #[serde(default)]
    pub required_extensions: Vec<String>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            max_connection_usage: default_max_connection_usage(),
            max_database_size_mb: None,
            required_roles: Vec::new(),
            required_tables: Vec::new(),
            required_extensions: Vec::new(),
        }
    }
}

fn default_max_connection_usage() -> f64 {
    0.8
}
