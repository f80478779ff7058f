//! Pulsing scheduler - fixed-rate control loop over the whole construct.
//!
//! # Tick model
//!
//! ```text
//!  tick k           tick k+1          tick k+2
//!    |--pulse a--|     |--pulse a-|      |...
//!    |--pulse b-----|  |--pulse b--|     |
//!    |--pulse c-|   ▲  |-pulse c-|       |
//!                   └─ barrier: every pulse of tick k done before tick k+1
//! ```
//!
//! The interval is a lower bound on cadence: a slow tick delays the next one,
//! ticks are never skipped. The run ends when the context clock passes
//! `start + duration`.

use crate::construct::Construct;
use crate::error::ConstructError;

use construct_env::ConstructContext;
use std::time::Duration;
use tracing::{debug, error, info};

/// Lateness tolerated before the schedule re-anchors.
const LATE_TOLERANCE: Duration = Duration::from_millis(5);

/// Totals for one pulsing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseSummary {
    /// Tick boundaries reached
    pub ticks: u64,

    /// Pulses that ran to completion (successfully or not)
    pub pulses: u64,

    /// Pulses that returned an error
    pub failures: u64,

    /// Cubes whose pulse task panicked and were dropped
    pub lost: usize,

    /// Context time spent in the run
    pub elapsed: Duration,
}

/// Tick boundary generator on a context clock.
#[derive(Debug, Clone)]
pub(crate) struct TickClock {
    interval: Duration,
    next: Duration,
}

impl TickClock {
    /// First boundary is one interval after `start`.
    pub(crate) fn new(start: Duration, interval: Duration) -> Self {
        Self {
            interval,
            next: start + interval,
        }
    }

    /// Waits for the next boundary and schedules the one after.
    pub(crate) async fn wait<Ctx: ConstructContext>(&mut self, ctx: &Ctx) {
        ctx.sleep_until(self.next).await;

        let now = ctx.now();
        self.next = if now > self.next + LATE_TOLERANCE {
            now + self.interval
        } else {
            self.next + self.interval
        };
    }

    /// The upcoming boundary.
    pub(crate) fn next_boundary(&self) -> Duration {
        self.next
    }
}

impl<Ctx> Construct<Ctx>
where
    Ctx: ConstructContext,
{
    /// Pulses every cube `actions_per_second` times per second for `duration`.
    ///
    /// Each tick spawns one task per cube and waits for all of them before
    /// the next boundary. Pulse errors are counted, never fatal.
    ///
    /// # Arguments
    /// * `actions_per_second` - Target tick rate (must be at least 1)
    /// * `duration` - Run length on the context clock
    pub async fn start_pulsing(
        &mut self,
        actions_per_second: u32,
        duration: Duration,
    ) -> Result<PulseSummary, ConstructError> {
        if actions_per_second == 0 {
            return Err(ConstructError::InvalidRate(actions_per_second));
        }

        let interval = Duration::from_secs(1) / actions_per_second;
        let start = self.context.now();
        let end = start + duration;
        let mut clock = TickClock::new(start, interval);
        let mut summary = PulseSummary::default();

        info!(
            cubes = self.cubes.len(),
            rate = actions_per_second,
            duration_ms = duration.as_millis() as u64,
            "pulsing started"
        );

        while self.context.now() < end {
            clock.wait(self.context.as_ref()).await;
            summary.ticks += 1;
            self.pulse_tick(&mut summary).await;

            if summary.ticks % u64::from(actions_per_second) == 0 {
                debug!(
                    ticks = summary.ticks,
                    failures = summary.failures,
                    next_ms = clock.next_boundary().as_millis() as u64,
                    "t={:.1}s",
                    (self.context.now() - start).as_secs_f64()
                );
            }
        }

        summary.elapsed = self.context.now() - start;
        info!(
            ticks = summary.ticks,
            pulses = summary.pulses,
            failures = summary.failures,
            "pulsing finished"
        );
        Ok(summary)
    }

    /// Fans out one pulse per cube and joins them in collection order.
    async fn pulse_tick(&mut self, summary: &mut PulseSummary) {
        let cubes = std::mem::take(&mut self.cubes);
        let context = self.context.clone();

        // Each task owns its cube until the barrier hands it back
        let handles: Vec<_> = cubes
            .into_iter()
            .map(|mut cube| {
                let name = cube.name().to_string();
                context.spawn(&name, async move {
                    let result = cube.pulse().await;
                    (cube, result)
                })
            })
            .collect();

        for handle in handles {
            match handle.await {
                Ok((cube, result)) => {
                    summary.pulses += 1;
                    if let Err(e) = &result {
                        summary.failures += 1;
                        debug!(error = %e, "pulse failed");
                    }
                    if let Some(scoreboard) = &self.scoreboard {
                        scoreboard.record(cube.name(), cube.position(), result.as_ref().err());
                    }
                    self.cubes.push(cube);
                }
                Err(join_error) => {
                    summary.lost += 1;
                    error!(error = %join_error, "pulse task failed; cube dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clamp::ClampRange;
    use crate::decision::DecisionFn;
    use crate::scoreboard::Scoreboard;
    use async_trait::async_trait;
    use construct_env::{ConnectionConfig, Vec3};
    use std::future::Future;
    use std::sync::{Arc, Mutex};
    use tokio::task::JoinHandle;

    /// Clock that only moves when slept on.
    #[derive(Default)]
    struct ManualClock {
        now: Mutex<Duration>,
    }

    #[async_trait]
    impl ConstructContext for ManualClock {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            *self.now.lock().unwrap() += duration;
        }

        fn spawn<F>(&self, _name: &str, future: F) -> JoinHandle<F::Output>
        where
            F: Future + Send + 'static,
            F::Output: Send + 'static,
        {
            tokio::spawn(future)
        }
    }

    fn construct_on(clock: Arc<ManualClock>) -> Construct<ManualClock> {
        Construct::with_context(
            clock,
            ConnectionConfig::new("127.0.0.1:1", "pw"),
            ClampRange::default(),
        )
    }

    #[tokio::test]
    async fn test_tick_count_matches_rate_times_duration() {
        let clock = Arc::new(ManualClock::default());
        let mut construct = construct_on(clock.clone());

        let summary = construct
            .start_pulsing(100, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(summary.ticks, 500);
        assert_eq!(summary.elapsed, Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fractional_duration_rounds_up() {
        let clock = Arc::new(ManualClock::default());
        let mut construct = construct_on(clock);

        // 0.25s at 10/s: boundaries at 0.1, 0.2, 0.3
        let summary = construct
            .start_pulsing(10, Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(summary.ticks, 3);
    }

    #[tokio::test]
    async fn test_zero_rate_rejected() {
        let mut construct = construct_on(Arc::new(ManualClock::default()));
        let err = construct.start_pulsing(0, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ConstructError::InvalidRate(0)));
    }

    #[tokio::test]
    async fn test_unspawned_cubes_fail_every_pulse_and_survive() {
        let clock = Arc::new(ManualClock::default());
        let scoreboard = Scoreboard::new();
        let mut construct = construct_on(clock).with_scoreboard(scoreboard.clone());

        let decision: Arc<dyn DecisionFn> = Arc::new(|p: Vec3| p.to_vec());
        construct.add_cube("a", [0.0; 3], decision.clone());
        construct.add_cube("b", [1.0; 3], decision);

        let summary = construct
            .start_pulsing(10, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(summary.ticks, 10);
        assert_eq!(summary.pulses, 20);
        assert_eq!(summary.failures, 20);
        assert_eq!(summary.lost, 0);

        // Order preserved across barriers
        let names: Vec<_> = construct.cubes().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(scoreboard.get("b").unwrap().failures, 10);
    }

    #[tokio::test]
    async fn test_tick_clock_reanchors_when_late() {
        let clock = ManualClock::default();
        let mut ticks = TickClock::new(Duration::ZERO, Duration::from_millis(10));

        ticks.wait(&clock).await;
        assert_eq!(clock.now(), Duration::from_millis(10));
        assert_eq!(ticks.next_boundary(), Duration::from_millis(20));

        // A barrier that overruns to t=45ms
        clock.sleep(Duration::from_millis(35)).await;
        ticks.wait(&clock).await;
        assert_eq!(clock.now(), Duration::from_millis(45));
        assert_eq!(ticks.next_boundary(), Duration::from_millis(55));
    }
}
