use std::{collections::VecDeque, time::Duration};

use tokio::{sync::Mutex, time::Instant};

/// Sliding-window rate limiter: at most `limit` acquisitions per `period`.
/// Callers past the limit sleep until the oldest stamp ages out. Fair enough
/// for outbound API budgets; not a scheduler.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: usize,
    period: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(limit: usize, period: Duration) -> Self {
        Self {
            limit,
            period,
            stamps: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// 250 requests per minute, the shared budget for provider APIs.
    pub fn per_minute_250() -> Self {
        Self::new(250, Duration::from_secs(60))
    }

    /// One request per second, the budget for torrent downloads and debrid
    /// `torrents` endpoints.
    pub fn per_second_1() -> Self {
        Self::new(1, Duration::from_secs(1))
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while stamps
                    .front()
                    .is_some_and(|stamp| now.duration_since(*stamp) >= self.period)
                {
                    stamps.pop_front();
                }
                if stamps.len() < self.limit {
                    stamps.push_back(now);
                    return;
                }
                self.period - now.duration_since(*stamps.front().expect("window is full"))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn waits_once_window_is_full() {
        let window = SlidingWindow::new(2, Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        window.acquire().await;
        window.acquire().await;
        // Third acquisition has to wait for the first stamp to age out.
        window.acquire().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn free_slots_do_not_wait() {
        let window = SlidingWindow::new(5, Duration::from_secs(60));
        let started = tokio::time::Instant::now();
        for _ in 0..5 {
            window.acquire().await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
