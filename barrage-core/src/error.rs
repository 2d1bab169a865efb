use thiserror::Error;

/// Problems found while loading or validating a scenario.
///
/// All of these are raised before any virtual user starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("`{field}` is required")]
    MissingField { field: String },

    #[error("unknown threshold metric `{metric}`")]
    UnknownMetric { metric: String },

    #[error("invalid threshold `{expression}`: {reason}")]
    InvalidThreshold { expression: String, reason: String },

    #[error("threshold `{expression}` refers to unknown scenario `{scenario}`")]
    UnknownScenario { expression: String, scenario: String },

    #[error("invalid base URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("malformed JSON scenario: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed YAML scenario: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}
