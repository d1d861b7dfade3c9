use crate::core::{AccessMode, IsolationLevel, Result, TxOptions, UnitError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a failed rollback reports when the callback had already failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackErrorPolicy {
    /// Report the rollback failure together with the original error.
    #[default]
    Join,
    /// Report only the rollback failure; the original error is dropped.
    Overwrite,
}

/// What happens when discarding a pipeline fails.
///
/// A pipeline that never executed leaves no partial state, so discard
/// failures are never returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardFailurePolicy {
    #[default]
    Log,
    Ignore,
}

/// Retry behavior for backends that own their transaction retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: usize,
    /// Base duration in milliseconds for backoff calculation.
    pub base_backoff_ms: u64,
    /// Maximum duration in milliseconds for backoff.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Exponential backoff before attempt `attempt + 1`, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let base = self.base_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        Duration::from_millis(backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 5,
            max_backoff_ms: 100,
        }
    }
}

/// Unit-of-work configuration shared by all managers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    /// Isolation level used by `run_unit` and the access-mode shortcuts
    pub default_isolation: IsolationLevel,

    /// Access mode used by `run_unit` and the isolation-level shortcuts
    pub default_access: AccessMode,

    pub rollback_error_policy: RollbackErrorPolicy,

    pub discard_failure_policy: DiscardFailurePolicy,

    /// Retry policy of the in-memory document store
    pub document_retry: RetryPolicy,
}

impl UnitConfig {
    pub fn new() -> Self {
        Self {
            default_isolation: IsolationLevel::ReadCommitted,
            default_access: AccessMode::ReadWrite,
            rollback_error_policy: RollbackErrorPolicy::Join,
            discard_failure_policy: DiscardFailurePolicy::Log,
            document_retry: RetryPolicy::default(),
        }
    }

    pub fn default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    pub fn default_access(mut self, access: AccessMode) -> Self {
        self.default_access = access;
        self
    }

    pub fn rollback_error_policy(mut self, policy: RollbackErrorPolicy) -> Self {
        self.rollback_error_policy = policy;
        self
    }

    pub fn discard_failure_policy(mut self, policy: DiscardFailurePolicy) -> Self {
        self.discard_failure_policy = policy;
        self
    }

    pub fn document_retry(mut self, retry: RetryPolicy) -> Self {
        self.document_retry = retry;
        self
    }

    pub fn default_options(&self) -> TxOptions {
        TxOptions::new(self.default_isolation, self.default_access)
    }

    /// Parse from JSON; missing fields take their defaults
    ///
    /// # Examples
    ///
    /// ```
    /// use scopedtx::{IsolationLevel, UnitConfig};
    ///
    /// let config = UnitConfig::from_json(r#"{"default_isolation": "serializable"}"#).unwrap();
    /// assert_eq!(config.default_isolation, IsolationLevel::Serializable);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| UnitError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let retry = &self.document_retry;
        if retry.max_attempts == 0 {
            return Err(UnitError::InvalidConfig(
                "document_retry.max_attempts must be > 0".to_string(),
            ));
        }

        if retry.base_backoff_ms > retry.max_backoff_ms {
            return Err(UnitError::InvalidConfig(
                "document_retry.base_backoff_ms cannot exceed max_backoff_ms".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UnitConfig::default();
        assert_eq!(config.default_isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.default_access, AccessMode::ReadWrite);
        assert_eq!(config.rollback_error_policy, RollbackErrorPolicy::Join);
        assert_eq!(config.discard_failure_policy, DiscardFailurePolicy::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = UnitConfig::new()
            .default_isolation(IsolationLevel::RepeatableRead)
            .default_access(AccessMode::ReadOnly)
            .rollback_error_policy(RollbackErrorPolicy::Overwrite);

        assert_eq!(
            config.default_options(),
            TxOptions::new(IsolationLevel::RepeatableRead, AccessMode::ReadOnly)
        );
        assert_eq!(config.rollback_error_policy, RollbackErrorPolicy::Overwrite);
    }

    #[test]
    fn test_from_json() {
        let config = UnitConfig::from_json(
            r#"{
                "default_access": "read_only",
                "discard_failure_policy": "ignore",
                "document_retry": { "max_attempts": 5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_access, AccessMode::ReadOnly);
        assert_eq!(config.discard_failure_policy, DiscardFailurePolicy::Ignore);
        assert_eq!(config.document_retry.max_attempts, 5);
        assert_eq!(config.document_retry.base_backoff_ms, 5);
    }

    #[test]
    fn test_invalid_json() {
        assert!(UnitConfig::from_json("not json").is_err());
        assert!(UnitConfig::from_json(r#"{"default_isolation": "chaos"}"#).is_err());
    }

    #[test]
    fn test_validate() {
        let zero_attempts = UnitConfig::new().document_retry(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        });
        assert!(matches!(
            zero_attempts.validate(),
            Err(UnitError::InvalidConfig(_))
        ));

        let inverted = UnitConfig::new().document_retry(RetryPolicy {
            max_attempts: 2,
            base_backoff_ms: 50,
            max_backoff_ms: 10,
        });
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 5,
            max_backoff_ms: 30,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(5));
        assert_eq!(retry.backoff(2), Duration::from_millis(10));
        assert_eq!(retry.backoff(3), Duration::from_millis(20));
        assert_eq!(retry.backoff(4), Duration::from_millis(30));
        assert!(retry.should_retry(9));
        assert!(!retry.should_retry(10));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }
}
