//! Operator self-registration with the messenger

use crate::messenger::{Messenger, Subscriber};
use crate::{Error, OperatorId, Result};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Default number of registration attempts
pub const DEFAULT_ATTEMPTS: usize = 3;

/// Bounded retry with optional exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub max_attempts: usize,
    /// Delay after the first failure, doubled after each further one
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Retry without waiting between attempts
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
        }
    }

    /// Retry with exponential backoff starting at `base_delay`
    pub fn with_backoff(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failures so far
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_backoff(DEFAULT_ATTEMPTS, Duration::from_millis(200))
    }
}

/// Register an operator node, retrying failed attempts
///
/// The first successful attempt ends the loop. When every attempt fails the
/// error carries each attempt's failure in order.
#[instrument(skip(messenger, policy))]
pub async fn register_operator<M: Messenger + ?Sized>(
    messenger: &M,
    operator_id: OperatorId,
    address: &str,
    topic: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    let subscriber = Subscriber {
        name: operator_id.to_string(),
        address: address.to_string(),
    };
    let max_attempts = policy.max_attempts.max(1);
    let mut errors = Vec::with_capacity(max_attempts);

    for attempt in 1..=max_attempts {
        match messenger.register_node(&subscriber, topic).await {
            Ok(()) => {
                info!(attempt, "Registered with messenger");
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %e, "Registration attempt failed");
                errors.push(format!("attempt {}: {}", attempt, e));
            }
        }

        if attempt < max_attempts {
            let delay = policy.delay_after(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(Error::RegistrationFailed {
        attempts: max_attempts,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::{MemoryMessenger, DEFAULT_TOPIC};

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let messenger = MemoryMessenger::new().fail_registrations(2);

        register_operator(&messenger, 7, "http://op7", DEFAULT_TOPIC, &RetryPolicy::immediate(3))
            .await
            .unwrap();

        assert_eq!(messenger.register_calls(), 3);
        assert_eq!(messenger.subscribers(DEFAULT_TOPIC).len(), 1);
        assert_eq!(messenger.subscribers(DEFAULT_TOPIC)[0].name, "7");
    }

    #[tokio::test]
    async fn test_first_success_stops() {
        let messenger = MemoryMessenger::new();

        register_operator(&messenger, 1, "http://op1", DEFAULT_TOPIC, &RetryPolicy::immediate(3))
            .await
            .unwrap();

        assert_eq!(messenger.register_calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_aggregates_errors() {
        let messenger = MemoryMessenger::new().fail_registrations(usize::MAX);

        let err = register_operator(&messenger, 1, "http://op1", DEFAULT_TOPIC, &RetryPolicy::immediate(3))
            .await
            .unwrap_err();

        assert_eq!(messenger.register_calls(), 3);
        match err {
            Error::RegistrationFailed { attempts, errors } => {
                assert_eq!(attempts, 3);
                assert_eq!(errors.len(), 3);
                assert!(errors[0].starts_with("attempt 1:"));
                assert!(errors[2].starts_with("attempt 3:"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let messenger = MemoryMessenger::new().fail_registrations(usize::MAX);
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        };

        let err = register_operator(&messenger, 1, "http://op1", DEFAULT_TOPIC, &policy)
            .await
            .unwrap_err();

        assert_eq!(messenger.register_calls(), 1);
        assert!(matches!(err, Error::RegistrationFailed { attempts: 1, ref errors } if errors.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let messenger = MemoryMessenger::new().fail_registrations(2);
        let policy = RetryPolicy::with_backoff(3, Duration::from_millis(100));
        let start = tokio::time::Instant::now();

        register_operator(&messenger, 1, "http://op1", DEFAULT_TOPIC, &policy)
            .await
            .unwrap();

        // 100ms after the first failure, 200ms after the second
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::with_backoff(5, Duration::from_millis(50));

        assert_eq!(policy.delay_after(1), Duration::from_millis(50));
        assert_eq!(policy.delay_after(2), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3), Duration::from_millis(200));
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, DEFAULT_ATTEMPTS);
    }
}
