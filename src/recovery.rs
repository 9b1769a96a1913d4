use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Recovery action to take after an error
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry after a delay
    RetryAfterDelay(Duration),
    /// Continue operation without the failed component
    Continue,
}

/// Recovery strategy configuration
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_backoff: true,
        }
    }
}

impl RecoveryConfig {
    /// Calculate delay for retry with exponential backoff
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay;
        }

        let factor = 2_u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Tracks retry attempts per collaborator. Every collaborator of the door is
/// optional, so exhausting retries always degrades instead of shutting down.
#[derive(Debug, Default)]
pub struct RecoveryManager {
    config: RecoveryConfig,
    retry_counts: HashMap<String, u32>,
}

impl RecoveryManager {
    /// Create a new recovery manager with default configuration
    pub fn new() -> Self {
        Self::with_config(RecoveryConfig::default())
    }

    /// Create a new recovery manager with custom configuration
    pub fn with_config(config: RecoveryConfig) -> Self {
        Self {
            config,
            retry_counts: HashMap::new(),
        }
    }

    /// Determine recovery action for an error
    pub fn handle_error(&mut self, component: &str, error: &dyn Display) -> RecoveryAction {
        let retry_count = self.get_retry_count(component);

        if retry_count >= self.config.max_retries {
            error!(
                "Maximum retries ({}) exceeded for component {}: {}",
                self.config.max_retries, component, error
            );
            return RecoveryAction::Continue;
        }

        self.retry_counts
            .insert(component.to_string(), retry_count + 1);
        let delay = self.config.delay_for(retry_count);

        info!(
            "Scheduling recovery for {} (attempt {}/{}): {}",
            component,
            retry_count + 1,
            self.config.max_retries,
            error
        );

        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Reset retry count for a component after successful recovery
    pub fn reset_retry_count(&mut self, component: &str) {
        if self.retry_counts.remove(component).is_some() {
            info!(
                "Component {} recovered successfully, reset retry count",
                component
            );
        }
    }

    /// Get current retry count for a component
    pub fn get_retry_count(&self, component: &str) -> u32 {
        self.retry_counts.get(component).copied().unwrap_or(0)
    }

    /// Check if component has exceeded retry limit
    pub fn has_exceeded_retry_limit(&self, component: &str) -> bool {
        self.get_retry_count(component) >= self.config.max_retries
    }
}

/// Run `operation` until it succeeds or the retry budget is spent.
/// Returns the last error when recovery gives up.
pub async fn retry_with_backoff<T, E, F, Fut>(
    component: &str,
    config: RecoveryConfig,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut manager = RecoveryManager::with_config(config);
    loop {
        match operation().await {
            Ok(value) => {
                manager.reset_retry_count(component);
                return Ok(value);
            }
            Err(error) => match manager.handle_error(component, &error) {
                RecoveryAction::RetryAfterDelay(delay) => {
                    debug!("Waiting {:?} before {} retry", delay, component);
                    sleep(delay).await;
                }
                RecoveryAction::Continue => {
                    warn!("{} recovery failed, continuing without it", component);
                    return Err(error);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_config(max_retries: u32) -> RecoveryConfig {
        RecoveryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            exponential_backoff: true,
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = RecoveryConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(8));
        assert_eq!(config.delay_for(10), Duration::from_secs(60));
        assert_eq!(config.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn test_flat_backoff() {
        let config = RecoveryConfig {
            exponential_backoff: false,
            ..RecoveryConfig::default()
        };
        assert_eq!(config.delay_for(4), Duration::from_secs(1));
    }

    #[test]
    fn test_manager_gives_up_after_limit() {
        let mut manager = RecoveryManager::with_config(quick_config(2));
        let err = "unreachable";

        assert!(matches!(
            manager.handle_error("recognizer", &err),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert!(matches!(
            manager.handle_error("recognizer", &err),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert_eq!(
            manager.handle_error("recognizer", &err),
            RecoveryAction::Continue
        );
        assert!(manager.has_exceeded_retry_limit("recognizer"));

        manager.reset_retry_count("recognizer");
        assert_eq!(manager.get_retry_count("recognizer"), 0);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff("camera", quick_config(5), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff("camera", quick_config(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
