//! Consumer retry policy with capped exponential backoff
//!
//! Decides, for a failed delivery attempt, whether the event is scheduled on
//! a delay-specific retry topic or routed to the dead-letter topic.

use std::collections::BTreeSet;
use std::time::Duration;

/// Suffix of the dead-letter topic
pub const DLT_SUFFIX: &str = ".DLT";

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total handler invocations per logical event, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Growth factor between successive delays
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// Outcome of a failed attempt under a [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish with `next_attempt` after `delay`
    Retry { next_attempt: u32, delay: Duration },
    /// Attempts exhausted
    DeadLetter,
}

impl RetryPolicy {
    /// Delay scheduled after the given failed attempt (1-based)
    ///
    /// `min(base_delay × multiplier^(attempt-1), max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_millis() as f64;

        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis.max(0.0) as u64)
        }
    }

    /// Decide what happens after `attempt` failed
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::Retry {
                next_attempt: attempt + 1,
                delay: self.delay_for(attempt),
            }
        } else {
            RetryDecision::DeadLetter
        }
    }

    /// Successive scheduled delays for one logical event
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|a| self.delay_for(a)).collect()
    }

    /// Retry topic for a delay (`<topic>-retry-<millis>`)
    pub fn retry_topic(topic: &str, delay: Duration) -> String {
        format!("{}-retry-{}", topic, delay.as_millis())
    }

    /// Dead-letter topic (`<topic>.DLT`)
    pub fn dlt_topic(topic: &str) -> String {
        format!("{topic}{DLT_SUFFIX}")
    }

    /// Every distinct retry topic this policy can schedule onto, in delay order
    pub fn retry_topics(&self, topic: &str) -> Vec<String> {
        self.schedule()
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|delay| Self::retry_topic(topic, delay))
            .collect()
    }

    /// Reject policies that can never deliver (zero attempts, shrinking backoff)
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if self.base_delay > self.max_delay {
            return Err("base_delay cannot exceed max_delay".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.schedule(), vec![ms(1000), ms(2000), ms(4000), ms(8000)]);
        assert_eq!(policy.delay_for(5), ms(16000));
        assert_eq!(policy.delay_for(6), ms(30000));
    }

    #[test]
    fn test_delays_non_decreasing_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 12,
            ..RetryPolicy::default()
        };
        let schedule = policy.schedule();
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        assert!(schedule.iter().all(|d| *d <= policy.max_delay));
        assert_eq!(*schedule.last().unwrap(), ms(30000));
    }

    #[test]
    fn test_huge_attempt_stays_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), ms(30000));
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: ms(1000)
            }
        );
        assert_eq!(
            policy.decide(4),
            RetryDecision::Retry {
                next_attempt: 5,
                delay: ms(8000)
            }
        );
        assert_eq!(policy.decide(5), RetryDecision::DeadLetter);
        assert_eq!(policy.decide(9), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_single_attempt_goes_straight_to_dlt() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.decide(1), RetryDecision::DeadLetter);
        assert!(policy.retry_topics("t").is_empty());
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(
            RetryPolicy::retry_topic("product-created-events-topic", ms(2000)),
            "product-created-events-topic-retry-2000"
        );
        assert_eq!(
            RetryPolicy::dlt_topic("product-created-events-topic"),
            "product-created-events-topic.DLT"
        );
    }

    #[test]
    fn test_equal_delays_share_a_topic() {
        let policy = RetryPolicy {
            max_attempts: 8,
            base_delay: ms(10),
            multiplier: 2.0,
            max_delay: ms(40),
        };
        assert_eq!(
            policy.retry_topics("t"),
            vec!["t-retry-10", "t-retry-20", "t-retry-40"]
        );
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        }
        .validate()
        .is_err());
        assert!(RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        }
        .validate()
        .is_err());
    }
}
