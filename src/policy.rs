use std::fmt;

use log::Level;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    MissingData,
    InvalidFormat,
    TransformationError,
    ValidationFailure,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 4] = [
        FailureCategory::MissingData,
        FailureCategory::InvalidFormat,
        FailureCategory::TransformationError,
        FailureCategory::ValidationFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::MissingData => "missing_data",
            FailureCategory::InvalidFormat => "invalid_format",
            FailureCategory::TransformationError => "transformation_error",
            FailureCategory::ValidationFailure => "validation_failure",
        }
    }

    /// Strategy used when a processing-rules document leaves the category unset.
    pub fn default_strategy(self) -> Strategy {
        match self {
            FailureCategory::MissingData => Strategy::LogWarningContinue,
            FailureCategory::InvalidFormat => Strategy::LogErrorSkipRecord,
            FailureCategory::TransformationError => Strategy::LogErrorUseDefault,
            FailureCategory::ValidationFailure => Strategy::LogErrorMarkInvalid,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    LogWarningContinue,
    LogErrorSkipRecord,
    LogErrorUseDefault,
    LogErrorMarkInvalid,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::LogWarningContinue => "LOG_WARNING_CONTINUE",
            Strategy::LogErrorSkipRecord => "LOG_ERROR_SKIP_RECORD",
            Strategy::LogErrorUseDefault => "LOG_ERROR_USE_DEFAULT",
            Strategy::LogErrorMarkInvalid => "LOG_ERROR_MARK_INVALID",
        }
    }

    pub fn log_level(self) -> Level {
        match self {
            Strategy::LogWarningContinue => Level::Warn,
            _ => Level::Error,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `error_handling` section of a processing-rules document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandlingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_data: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_format: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation_error: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_failure: Option<Strategy>,
}

impl ErrorHandlingPolicy {
    pub fn strategy_for(&self, category: FailureCategory) -> Strategy {
        let configured = match category {
            FailureCategory::MissingData => self.missing_data,
            FailureCategory::InvalidFormat => self.invalid_format,
            FailureCategory::TransformationError => self.transformation_error,
            FailureCategory::ValidationFailure => self.validation_failure,
        };
        configured.unwrap_or_else(|| category.default_strategy())
    }

    pub fn with(mut self, category: FailureCategory, strategy: Strategy) -> Self {
        let slot = match category {
            FailureCategory::MissingData => &mut self.missing_data,
            FailureCategory::InvalidFormat => &mut self.invalid_format,
            FailureCategory::TransformationError => &mut self.transformation_error,
            FailureCategory::ValidationFailure => &mut self.validation_failure,
        };
        *slot = Some(strategy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_categories_fall_back_to_defaults() {
        let policy = ErrorHandlingPolicy::default();
        for category in FailureCategory::ALL {
            assert_eq!(policy.strategy_for(category), category.default_strategy());
        }
    }

    #[test]
    fn parses_configured_strategies() {
        let policy: ErrorHandlingPolicy = serde_yaml::from_str(
            "missing_data: LOG_ERROR_SKIP_RECORD\nvalidation_failure: LOG_WARNING_CONTINUE\n",
        )
        .expect("policy parses");
        assert_eq!(
            policy.strategy_for(FailureCategory::MissingData),
            Strategy::LogErrorSkipRecord
        );
        assert_eq!(
            policy.strategy_for(FailureCategory::ValidationFailure),
            Strategy::LogWarningContinue
        );
        assert_eq!(
            policy.strategy_for(FailureCategory::InvalidFormat),
            Strategy::LogErrorSkipRecord
        );
    }

    #[test]
    fn rejects_unknown_tokens() {
        assert!(serde_yaml::from_str::<ErrorHandlingPolicy>("missing_data: IGNORE\n").is_err());
        assert!(serde_yaml::from_str::<ErrorHandlingPolicy>("timeouts: LOG_WARNING_CONTINUE\n").is_err());
    }
}
