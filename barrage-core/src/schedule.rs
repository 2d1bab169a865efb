//! Target concurrency as a function of elapsed time.
use crate::{Executor, Interpolation, Stage};
use std::time::Duration;

impl Executor {
    /// Span after which the target concurrency is zero.
    pub fn total_duration(&self) -> Duration {
        match self {
            Executor::Constant { duration, .. } => *duration,
            Executor::Ramping { stages, .. } => stages
                .iter()
                .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration)),
        }
    }

    /// Number of virtual users that should be active `elapsed` into the run.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        match self {
            Executor::Constant { vus, duration } => {
                if elapsed < *duration {
                    *vus
                } else {
                    0
                }
            }
            Executor::Ramping {
                start_vus,
                stages,
                interpolation,
            } => ramp_target(*start_vus, stages, *interpolation, elapsed),
        }
    }
}

fn ramp_target(
    start_vus: u64,
    stages: &[Stage],
    interpolation: Interpolation,
    elapsed: Duration,
) -> u64 {
    let mut stage_start = Duration::ZERO;
    let mut from = start_vus;

    for stage in stages {
        let stage_end = stage_start.saturating_add(stage.duration);
        if elapsed < stage_end {
            return match interpolation {
                Interpolation::Step => stage.target,
                Interpolation::Linear => {
                    let progress = (elapsed - stage_start).as_secs_f64()
                        / stage.duration.as_secs_f64();
                    let delta = stage.target as f64 - from as f64;
                    (from as f64 + delta * progress).round().max(0.) as u64
                }
            };
        }

        stage_start = stage_end;
        from = stage.target;
    }

    0
}
