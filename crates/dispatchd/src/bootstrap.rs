//! Configuration loading shared by the dispatch binaries.

use std::path::Path;

use dispatch_core::config::{apply_env_overrides, load_dispatch_config_or_default, ConfigError, DispatchConfig};
use dispatch_core::validation::{has_errors, Validate, ValidationIssue, ValidationLevel};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {}", error_summary(.issues))]
    InvalidConfig { issues: Vec<ValidationIssue> },
}

fn error_summary(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| format!("{} ({})", issue.message, issue.code))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Load `path` (defaults when missing), apply process environment overrides
/// and validate. Warnings are logged; errors abort.
pub fn load_config(path: &Path) -> Result<DispatchConfig, BootstrapError> {
    load_config_with(path, |var| std::env::var(var).ok())
}

pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<DispatchConfig, BootstrapError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = load_dispatch_config_or_default(path)?;
    apply_env_overrides(&mut config, lookup)?;

    let issues = config.validate();
    for issue in issues.iter().filter(|i| i.level == ValidationLevel::Warning) {
        tracing::warn!(code = issue.code, "{}", issue.message);
    }
    if has_errors(&issues) {
        return Err(BootstrapError::InvalidConfig { issues });
    }

    tracing::debug!(path = %path.display(), bind = %config.server.bind, "configuration loaded");
    Ok(config)
}
