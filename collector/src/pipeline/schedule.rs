use std::time::Duration;
use tokio::time::{
    Instant,
    Interval,
    MissedTickBehavior,
};

/// Fixed wall-clock ticks that never overlap the work between them.
///
/// A cycle that overruns its tick delays the next tick until it is done
/// instead of firing a burst of catch-up ticks.
pub struct FixedInterval {
    interval: Interval,
    period: Duration,
    busy_since: Option<Instant>,
}

impl FixedInterval {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            period,
            busy_since: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next tick and returns the duty cycle of the work done
    /// since the previous one: busy time divided by the period. Above 1.0
    /// the work overran the tick. The first tick fires immediately and
    /// reports 0.
    pub async fn tick(&mut self) -> f64 {
        let busy = self.busy_since.map(|since| since.elapsed()).unwrap_or_default();
        self.interval.tick().await;
        self.busy_since = Some(Instant::now());
        busy.as_secs_f64() / self.period.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn reports_duty_cycle() {
        let mut ticks = FixedInterval::new(Duration::from_secs(30));
        let start = Instant::now();
        assert_eq!(ticks.tick().await, 0.0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ticks.tick().await, 0.2);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_delays_next_tick() {
        let mut ticks = FixedInterval::new(Duration::from_secs(30));
        ticks.tick().await;
        let start = Instant::now();

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(ticks.tick().await, 1.5);
        // no catch-up burst: the following tick is a full period later
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.tick().await, 0.1);
        assert_eq!(start.elapsed(), Duration::from_secs(75));
    }
}
