//! Retry - backoff の計算と、リトライ付き読み取り
//!
//! # 学習ポイント
//! - 遅延の計算は純粋関数（`BackoffPolicy::delay_for`）
//! - 待機は `Sleeper` 経由なので、テストでは実時間を使わない
//! - 待つのは試行と試行の「間」だけ（最後の試行の後には待たない）

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::ports::Sleeper;

/// Exponential backoff for idempotent reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,

    pub growth_factor: f64,

    /// Total number of attempts, including the first one.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            growth_factor: 1.5,
            max_retries: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after attempt `attempt` (0-indexed) failed.
    ///
    /// `initial_delay * growth_factor^attempt`:
    /// with 1000ms and 1.5 this is 1000ms, 1500ms, 2250ms, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.growth_factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// A value obtained by `retry_fetch`, with the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
}

/// Every attempt came back empty or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: Option<E>,
}

/// Calls `fetch` until it yields `Some`, at most `policy.max_retries` times.
///
/// `fetch` receives the 0-indexed attempt number. `Ok(None)` and `Err(_)` are
/// both treated as "not yet", so `fetch` must be a side-effect free read.
pub async fn retry_fetch<T, E, F, Fut>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    mut fetch: F,
) -> Result<Fetched<T>, Exhausted<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let mut last_error = None;
    for attempt in 0..policy.max_retries {
        match fetch(attempt).await {
            Ok(Some(value)) => {
                return Ok(Fetched {
                    value,
                    attempts: attempt + 1,
                });
            }
            Ok(None) => {
                tracing::debug!(attempt = attempt + 1, "not visible yet");
            }
            Err(e) => {
                tracing::debug!(attempt = attempt + 1, error = %e, "fetch failed");
                last_error = Some(e);
            }
        }

        if attempt + 1 < policy.max_retries {
            let delay = policy.delay_for(attempt);
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying after backoff"
            );
            sleeper.sleep(delay).await;
        }
    }
    Err(Exhausted {
        attempts: policy.max_retries,
        last_error,
    })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RecordingSleeper;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_policy_matches_resolver_budget() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(1000));
        assert_eq!(policy.growth_factor, 1.5);
        assert_eq!(policy.max_retries, 3);
    }

    #[rstest]
    #[case::first(0, 1000)]
    #[case::second(1, 1500)]
    #[case::third(2, 2250)]
    #[case::fourth(3, 3375)]
    fn delay_grows_exponentially(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = BackoffPolicy {
            growth_factor: 10.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
    }

    #[rstest]
    #[case::first_try(1)]
    #[case::second_try(2)]
    #[case::last_try(3)]
    #[tokio::test]
    async fn succeeds_after_exactly_k_attempts(#[case] k: u32) {
        let policy = BackoffPolicy::default();
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);

        let fetched = retry_fetch(&policy, &sleeper, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>((attempt + 1 == k).then_some("cap")) }
        })
        .await
        .unwrap();

        assert_eq!(fetched.value, "cap");
        assert_eq!(fetched.attempts, k);
        assert_eq!(calls.load(Ordering::SeqCst), k);

        let delays = sleeper.recorded();
        assert_eq!(delays.len() as u32, k - 1);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn never_succeeding_fetch_stops_at_budget() {
        let policy = BackoffPolicy::default();
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);

        let exhausted = retry_fetch(&policy, &sleeper, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Option<()>, _>("transport down".to_string()) }
        })
        .await
        .unwrap_err();

        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error.as_deref(), Some("transport down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // no sleep after the final attempt
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(1000), Duration::from_millis(1500)]
        );
    }

    #[test]
    fn policy_deserializes_from_millis() {
        let policy: BackoffPolicy = serde_json::from_str(
            r#"{"initial_delay_ms":250,"growth_factor":2.0,"max_retries":5}"#,
        )
        .unwrap();
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }
}
