use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub const QUOTA_WINDOW: Duration = Duration::from_secs(60);

/// Rolling-window call budget for the document service.
pub struct Quota {
    limit: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl Quota {
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, QUOTA_WINDOW)
    }

    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a call fits in the window, then records it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                match reserve(&mut calls, self.limit, self.window, Instant::now()) {
                    None => return,
                    Some(wait) => wait,
                }
            };

            tracing::info!(
                pause_secs = wait.as_secs_f64(),
                limit = self.limit,
                "Document service quota used up, pausing"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls recorded in the current window.
    pub async fn used(&self) -> usize {
        let mut calls = self.calls.lock().await;
        expire(&mut calls, self.window, Instant::now());
        calls.len()
    }
}

fn expire(calls: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(oldest) = calls.front() {
        if now.duration_since(*oldest) >= window {
            calls.pop_front();
        } else {
            break;
        }
    }
}

/// Records a call at `now` and returns `None`, or returns how long to wait
/// when the window is full.
fn reserve(
    calls: &mut VecDeque<Instant>,
    limit: usize,
    window: Duration,
    now: Instant,
) -> Option<Duration> {
    expire(calls, window, now);

    if calls.len() < limit {
        calls.push_back(now);
        return None;
    }

    calls
        .front()
        .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_refuses_past_limit() {
        let start = Instant::now();
        let mut calls = VecDeque::new();
        for _ in 0..3 {
            assert_eq!(reserve(&mut calls, 3, QUOTA_WINDOW, start), None);
        }

        let later = start + Duration::from_secs(20);
        assert_eq!(
            reserve(&mut calls, 3, QUOTA_WINDOW, later),
            Some(Duration::from_secs(40))
        );
    }

    #[test]
    fn test_window_rolls_forward() {
        let start = Instant::now();
        let mut calls = VecDeque::new();
        reserve(&mut calls, 2, QUOTA_WINDOW, start);
        reserve(&mut calls, 2, QUOTA_WINDOW, start + Duration::from_secs(30));

        let after_first_expired = start + Duration::from_secs(60);
        assert_eq!(reserve(&mut calls, 2, QUOTA_WINDOW, after_first_expired), None);
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_pauses_until_window_frees() {
        let quota = Quota::per_minute(2);
        let start = Instant::now();

        quota.acquire().await;
        quota.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        quota.acquire().await;
        assert!(start.elapsed() >= QUOTA_WINDOW);
        assert_eq!(quota.used().await, 1);
    }
}
