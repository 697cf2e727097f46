//! ADB 準備完了待機モジュール（Exponential Backoff）
//!
//! コンテナ起動直後は Android のブートが終わっておらず、ADB 接続が
//! 拒否される。ブート完了まで接続を繰り返す。

use crate::error::{RedroidError, Result};
use phonefleet_provider::Adb;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const INITIAL_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(4);

/// Delay before poll `attempt` (0-based), doubling up to [`MAX_DELAY`]
pub fn delay_for_attempt(attempt: u32) -> Duration {
    INITIAL_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_DELAY)
}

/// `serial` が `device` 状態になるまで待機
pub async fn wait_for_adb(adb: &Adb, serial: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut attempt = 0;

    loop {
        if adb.connect(serial).await.is_ok()
            && adb.get_state(serial).await.is_ok_and(|state| state == "device")
        {
            tracing::debug!(serial, attempt, "ADB ready");
            return Ok(());
        }

        let delay = delay_for_attempt(attempt);
        if Instant::now() + delay > deadline {
            return Err(RedroidError::AdbNotReady {
                serial: serial.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        assert_eq!(delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(delay_for_attempt(10), Duration::from_millis(4000)); // capped at max
        assert_eq!(delay_for_attempt(40), MAX_DELAY);
    }

    #[tokio::test]
    async fn test_missing_adb_binary_times_out() {
        let adb = Adb::new("/nonexistent/adb");
        let err = wait_for_adb(&adb, "127.0.0.1:5555", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RedroidError::AdbNotReady { .. }));
    }
}
