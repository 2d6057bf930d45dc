//! Errors from loading and validating harness configuration.

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// An explicitly requested config file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The file extension does not map to a supported syntax.
    #[error("unsupported config format for '{0}' (expected .toml, .yaml or .yml)")]
    UnsupportedFormat(String),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to parse YAML.
    #[error("failed to parse YAML config: {0}")]
    ParseYaml(String),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field holds a value that fails validation.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    /// Two servers share the same name.
    #[error("server '{0}' is configured more than once")]
    DuplicateServer(String),
}

impl ConfigError {
    /// Create a validation error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::ParseYaml(e.to_string())
    }
}
