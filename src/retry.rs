pub(crate) const MAX_FETCH_ATTEMPTS: u32 = 3;
pub(crate) const RETRY_BASE_DELAY_MS: u64 = 500;

/// Backoff before attempt `attempt + 1`: doubles per attempt, plus up to 50% jitter.
pub(crate) fn backoff_delay(attempt: u32) -> std::time::Duration {
    let base = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let jitter = fastrand::u64(0..=base / 2);
    std::time::Duration::from_millis(base + jitter)
}

macro_rules! retry_fetch_operation {
    ($context:expr, $operation:expr) => {{
        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= $crate::retry::MAX_FETCH_ATTEMPTS => break Err(err),
                Err(err) => {
                    let delay = $crate::retry::backoff_delay(attempt);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}ms.",
                        attempt,
                        $crate::retry::MAX_FETCH_ATTEMPTS,
                        context_value,
                        err,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_fetch_operation;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_and_stays_within_jitter_bounds() {
        for attempt in 1..=3u32 {
            let base = RETRY_BASE_DELAY_MS * (1 << (attempt - 1));
            let delay = backoff_delay(attempt).as_millis() as u64;
            assert!(delay >= base && delay <= base + base / 2, "attempt {attempt}: {delay}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_fetch_operation!("flaky fetch", async {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                Err(format!("attempt {call} failed"))
            } else {
                Ok(call)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_fetch_operation!("broken fetch", async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_FETCH_ATTEMPTS);
    }
}
