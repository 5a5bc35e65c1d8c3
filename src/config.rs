//! Configuration for the context registry.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, Result};

/// Scope name used by `run_in_context` when no store is supplied and none
/// has been published yet.
pub const DEFAULT_SCOPE: &str = "taskctx";

/// Environment variable overriding [`RegistryConfig::default_scope`].
pub const ENV_DEFAULT_SCOPE: &str = "TASKCTX_DEFAULT_SCOPE";

/// Environment variable overriding [`RegistryConfig::on_conflict`].
pub const ENV_ON_CONFLICT: &str = "TASKCTX_ON_CONFLICT";

/// What `create_context` does when a different scope is already published
/// as the process-wide default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultScopePolicy {
    /// Fail with [`ContextError::DefaultScopeConflict`] and create nothing.
    #[default]
    Reject,
    /// Create the store but leave the published default untouched. The new
    /// store must be passed explicitly wherever it is needed.
    KeepFirst,
    /// Publish the new store over the old one.
    Replace,
}

impl fmt::Display for DefaultScopePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reject => "reject",
            Self::KeepFirst => "keep_first",
            Self::Replace => "replace",
        };
        f.write_str(s)
    }
}

impl FromStr for DefaultScopePolicy {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reject" => Ok(Self::Reject),
            "keep_first" => Ok(Self::KeepFirst),
            "replace" => Ok(Self::Replace),
            other => Err(ContextError::Configuration(format!(
                "unknown default scope policy: {other}"
            ))),
        }
    }
}

/// Registry configuration.
///
/// # Example Configuration File
///
/// ```toml
/// default_scope = "app"
/// on_conflict = "keep_first"
/// ```
///
/// # Examples
///
/// ```
/// use taskctx::{DefaultScopePolicy, RegistryConfig};
///
/// let config = RegistryConfig::from_toml("default_scope = \"app\"").unwrap();
/// assert_eq!(config.default_scope, "app");
/// assert_eq!(config.on_conflict, DefaultScopePolicy::Reject);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Scope created when `run_in_context` finds nothing published.
    #[serde(default = "default_scope")]
    pub default_scope: String,

    /// Behavior when a second distinct scope asks to become the default.
    #[serde(default)]
    pub on_conflict: DefaultScopePolicy,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_scope: default_scope(),
            on_conflict: DefaultScopePolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback scope name.
    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    /// Set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: DefaultScopePolicy) -> Self {
        self.on_conflict = policy;
        self
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ContextError::Configuration(e.to_string()))
    }

    /// Load configuration from environment variables, starting from the
    /// defaults.
    ///
    /// - `TASKCTX_DEFAULT_SCOPE` - fallback scope name
    /// - `TASKCTX_ON_CONFLICT` - `reject`, `keep_first` or `replace`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(scope) = std::env::var(ENV_DEFAULT_SCOPE) {
            config.default_scope = scope;
        }
        if let Ok(policy) = std::env::var(ENV_ON_CONFLICT) {
            config.on_conflict = policy.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.default_scope.trim().is_empty() {
            return Err(ContextError::InvalidScopeName(self.default_scope.clone()));
        }
        Ok(())
    }
}
