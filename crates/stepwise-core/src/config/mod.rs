mod database;
mod logging;
mod preflight;
mod verification;

pub use database::DatabaseConfig;
pub use logging::LoggingConfig;
pub use preflight::PreflightConfig;
pub use verification::{UnknownStepPolicy, VerificationConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StepwiseError};

/// Root configuration for stepwise.
///
/// Connection keys (`db_name`, `db_user`, ...) live at the top level of the
/// file; everything else is grouped into optional sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepwiseConfig {
    /// Database connection parameters.
    #[serde(flatten)]
    pub database: DatabaseConfig,

    /// Pre-flight check configuration.
    #[serde(default)]
    pub preflight: PreflightConfig,

    /// Verification configuration.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StepwiseConfig {
    /// Load configuration from a file.
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StepwiseError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::parse_json(&content)
        } else {
            Self::parse_toml(&content)
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| StepwiseError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| StepwiseError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.name.trim().is_empty() {
            return Err(StepwiseError::Config("db_name must not be empty".into()));
        }
        if self.database.user.trim().is_empty() {
            return Err(StepwiseError::Config("db_user must not be empty".into()));
        }

        let usage = self.preflight.max_connection_usage;
        if !(usage > 0.0 && usage <= 1.0) {
            return Err(StepwiseError::Config(format!(
                "preflight.max_connection_usage must be in (0, 1], got {}",
                usage
            )));
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
        db_name = "helpdesk"
        db_user = "postgres"
        db_password = "secret"
    "#;

    #[test]
    fn test_parse_minimal_config() {
        let config = StepwiseConfig::parse_toml(MINIMAL).unwrap();
        assert_eq!(config.database.name, "helpdesk");
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.preflight.max_connection_usage, 0.8);
        assert_eq!(config.logging.file.to_str(), Some("migrations.log"));
        assert_eq!(
            config.verification.script.to_str(),
            Some("verify_migration.sql")
        );
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            db_name = "helpdesk"
            db_user = "migrator"
            db_password = "secret"
            db_host = "db.internal"
            db_port = 6543
            statement_timeout_secs = 60

            [preflight]
            max_connection_usage = 0.9
            max_database_size_mb = 2048
            required_roles = ["authenticated", "anon"]

            [verification]
            script = "sql/verify.sql"
            unknown_steps = "fail"
            require_passed = true

            [logging]
            level = "debug"
            file = "/var/log/stepwise.log"
            json_format = true
        "#;

        let config = StepwiseConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.statement_timeout_secs, Some(60));
        assert_eq!(config.preflight.max_database_size_mb, Some(2048));
        assert_eq!(config.preflight.required_roles.len(), 2);
        assert_eq!(config.verification.unknown_steps, UnknownStepPolicy::Fail);
        assert!(config.verification.require_passed);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "db_name": "helpdesk",
            "db_user": "postgres",
            "db_password": "secret",
            "db_host": "127.0.0.1",
            "db_port": 54322
        }"#;

        let config = StepwiseConfig::parse_json(json).unwrap();
        assert_eq!(config.database.host, "127.0.0.1");
        assert_eq!(config.database.port, 54322);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = StepwiseConfig::parse_json(r#"{"db_name": "helpdesk","#).unwrap_err();
        assert!(matches!(err, StepwiseError::Config(_)));
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = TempDir::new().unwrap();

        let json_path = dir.path().join("config.json");
        fs::write(
            &json_path,
            r#"{"db_name": "a", "db_user": "b", "db_password": "c"}"#,
        )
        .unwrap();
        assert_eq!(StepwiseConfig::from_file(&json_path).unwrap().database.name, "a");

        let toml_path = dir.path().join("stepwise.toml");
        fs::write(&toml_path, MINIMAL).unwrap();
        assert_eq!(
            StepwiseConfig::from_file(&toml_path).unwrap().database.name,
            "helpdesk"
        );
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = StepwiseConfig::from_file("/nonexistent/stepwise.toml").unwrap_err();
        assert!(matches!(err, StepwiseError::Config(_)));
    }

    #[test]
    fn test_missing_required_key() {
        let toml = r#"
            db_user = "postgres"
            db_password = "secret"
        "#;
        assert!(StepwiseConfig::parse_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_bad_connection_usage() {
        let toml = format!("{}\n[preflight]\nmax_connection_usage = 1.5\n", MINIMAL);
        let err = StepwiseConfig::parse_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("max_connection_usage"));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("STEPWISE_TEST_DB_PASSWORD", "from-env");

        let toml = r#"
            db_name = "helpdesk"
            db_user = "postgres"
            db_password = "${STEPWISE_TEST_DB_PASSWORD}"
        "#;

        let config = StepwiseConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.password, "from-env");

        std::env::remove_var("STEPWISE_TEST_DB_PASSWORD");
    }
}
