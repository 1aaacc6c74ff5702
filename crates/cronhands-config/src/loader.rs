//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        if let Some(dir) = config.logging.dir.take() {
            config.logging.dir = Some(PathBuf::from(Self::expand_path(&dir.to_string_lossy())));
        }
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Config::default()),
            },
        }
    }

    /// `<config dir>/cronhands/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cronhands").join("config.toml"))
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        static VAR: OnceLock<Regex> = OnceLock::new();
        let re = VAR.get_or_init(|| {
            Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|e| unreachable!("static regex: {e}"))
        });

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/logs`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.server.port, 2112);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            [server]
            host = "0.0.0.0"
            port = 3000
            path = "/cron"

            [manager]
            name = "test-run"
            devel = true

            [logging]
            level = "debug"
            json = true

            [[jobs]]
            name = "f1"
            schedule = "* * * * *"
            max_sleep_secs = 5

            [[jobs]]
            name = "f3m"
            schedule = "*/2 * * * *"
            maintenance = true
            error_rate = 0.0
            panic_rate = 0.5
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.server.addr(), "0.0.0.0:3000");
        assert_eq!(config.server.path, "/cron");
        assert_eq!(config.manager.name, "test-run");
        assert!(config.manager.devel);
        assert!(config.logging.json);
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].max_sleep_secs, 5);
        assert!(config.jobs[1].maintenance);
        assert_eq!(config.jobs[1].panic_rate, 0.5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]").unwrap();
        writeln!(file, "port = 5000").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/cronhands.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_with_explicit_path() {
        let result = ConfigLoader::load_or_default(Some(Path::new("/nonexistent/cronhands.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("CRONHANDS_TEST_PORT", "4321");
        }
        let config = ConfigLoader::load_str("[server]\nport = ${CRONHANDS_TEST_PORT}").unwrap();
        assert_eq!(config.server.port, 4321);
        unsafe {
            std::env::remove_var("CRONHANDS_TEST_PORT");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_CRONHANDS_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(ref v)) if v == "NONEXISTENT_CRONHANDS_VAR_12345"));
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let content = "value = \"no variables here\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert_eq!(expanded, content);
    }

    #[test]
    fn test_logging_dir_tilde_is_expanded() {
        let config = ConfigLoader::load_str("[logging]\ndir = \"~/logs\"").unwrap();
        let dir = config.logging.dir.unwrap();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("logs"));
    }

    #[test]
    fn test_expand_path_no_tilde() {
        let path = "/var/log/cronhands";
        assert_eq!(ConfigLoader::expand_path(path), path);
    }

    #[test]
    fn test_shipped_sample_config() {
        let config = ConfigLoader::load_str(include_str!("../../../config/cronhands.toml")).unwrap();
        assert_eq!(config.server.addr(), "127.0.0.1:2112");
        assert_eq!(config.jobs.len(), 4);
        assert!(config.jobs.iter().any(|j| j.name == "f3m" && j.maintenance));

        let result = crate::ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }
}
