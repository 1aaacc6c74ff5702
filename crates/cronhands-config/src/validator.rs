//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(ConfigError::InvalidValue {
                field: err.path,
                message: err.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
///
/// Cron expressions are not parsed here; the manager checks them at
/// activation.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_manager(config, &mut result);
        Self::validate_jobs(config, &mut result);

        result
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }

        let path = &config.server.path;
        if !path.starts_with('/') {
            result.add_error(ValidationError::new(
                "server.path",
                "path must start with '/'",
            ));
        } else if path.len() > 1 && path.ends_with('/') {
            result.add_warning(ValidationWarning::new(
                "server.path",
                "trailing '/' will be stripped",
            ));
        }
    }

    fn validate_manager(config: &Config, result: &mut ValidationResult) {
        if config.manager.name.trim().is_empty() {
            result.add_error(ValidationError::new(
                "manager.name",
                "Manager name cannot be empty",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        if config.jobs.is_empty() {
            result.add_warning(ValidationWarning::new(
                "jobs",
                "No jobs configured, the manager will have nothing to run",
            ));
        }

        let mut seen = HashSet::new();
        for (i, job) in config.jobs.iter().enumerate() {
            let path = format!("jobs[{}]", i);

            if job.name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    "Job name cannot be empty",
                ));
            } else if !seen.insert(job.name.to_lowercase()) {
                // the manager rejects this too, report it before startup
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    format!("Duplicate job name '{}'", job.name),
                ));
            }

            for (field, rate) in [("error_rate", job.error_rate), ("panic_rate", job.panic_rate)] {
                if !(0.0..=1.0).contains(&rate) {
                    result.add_error(ValidationError::new(
                        format!("{}.{}", path, field),
                        format!("{} must be between 0 and 1, got {}", field, rate),
                    ));
                }
            }

            if job.error_rate + job.panic_rate > 1.0 {
                result.add_warning(ValidationWarning::new(
                    path.clone(),
                    "error_rate + panic_rate exceeds 1, every run will fail",
                ));
            }

            if job.max_sleep_secs > 3600 {
                result.add_warning(ValidationWarning::new(
                    format!("{}.max_sleep_secs", path),
                    "max_sleep_secs is very high (>3600), runs may overlap their schedule",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
