//! Shared scoreboard fed by the pulsing scheduler.
//!
//! The scheduler writes one sample per cube at each tick barrier; any number
//! of observers may read concurrently. All access goes through one lock, so
//! concurrent pulse tasks never touch the aggregate directly.
//!
//! Distances are measured to a goal point (the origin unless set with
//! `with_goal`), and `best` names the cube closest to it.

use construct_env::Vec3;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::CubeError;

/// Latest per-cube observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CubeSample {
    /// Last server-reported position
    pub position: Vec3,

    /// Euclidean distance of `position` from the scoreboard's goal
    pub distance: f64,

    /// Pulses attempted
    pub pulses: u64,

    /// Pulses that returned an error
    pub failures: u64,

    /// Message of the most recent failure
    pub last_error: Option<String>,
}

/// Clonable handle to a guarded map of cube samples keyed by cube name.
#[derive(Debug, Clone, Default)]
pub struct Scoreboard {
    samples: Arc<RwLock<BTreeMap<String, CubeSample>>>,
    goal: Vec3,
}

impl Scoreboard {
    /// Creates an empty scoreboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty scoreboard measuring distances to `goal`.
    pub fn with_goal(goal: Vec3) -> Self {
        Self {
            samples: Arc::default(),
            goal,
        }
    }

    /// The point distances are measured to.
    pub fn goal(&self) -> Vec3 {
        self.goal
    }

    /// Records the outcome of one pulse.
    pub fn record(&self, cube: &str, position: Vec3, error: Option<&CubeError>) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let sample = samples.entry(cube.to_string()).or_default();

        sample.position = position;
        sample.distance = distance(position, self.goal);
        sample.pulses += 1;
        if let Some(error) = error {
            sample.failures += 1;
            sample.last_error = Some(error.to_string());
        }
    }

    /// Returns a copy of every sample.
    pub fn snapshot(&self) -> BTreeMap<String, CubeSample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the sample for one cube.
    pub fn get(&self, cube: &str) -> Option<CubeSample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cube)
            .cloned()
    }

    /// The cube closest to the goal, `None` if empty.
    pub fn best(&self) -> Option<(String, CubeSample)> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples
            .iter()
            .min_by(|a, b| a.1.distance.total_cmp(&b.1.distance))
            .map(|(name, sample)| (name.clone(), sample.clone()))
    }

    /// Mean distance to the goal across cubes, `None` if empty.
    pub fn mean_distance(&self) -> Option<f64> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        if samples.is_empty() {
            return None;
        }
        let total: f64 = samples.values().map(|s| s.distance).sum();
        Some(total / samples.len() as f64)
    }

    /// Number of cubes seen so far.
    pub fn len(&self) -> usize {
        self.samples.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn distance(p: Vec3, goal: Vec3) -> f64 {
    p.iter()
        .zip(goal)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scoreboard_accumulates() {
        let board = Scoreboard::new();
        assert!(board.is_empty());
        assert_eq!(board.mean_distance(), None);

        board.record("a_BASE", [3.0, 4.0, 0.0], None);
        board.record("a_BASE", [0.0, 0.0, 2.0], None);

        let err = CubeError::NoConnection { cube: "b".into() };
        board.record("b", [0.0, 0.0, 0.0], Some(&err));

        let a = board.get("a_BASE").unwrap();
        assert_eq!(a.pulses, 2);
        assert_eq!(a.failures, 0);
        assert_relative_eq!(a.distance, 2.0);

        let b = board.get("b").unwrap();
        assert_eq!(b.failures, 1);
        assert_eq!(b.last_error.as_deref(), Some("[b] no connection"));

        assert_eq!(board.len(), 2);
        assert_relative_eq!(board.mean_distance().unwrap(), 1.0);
    }

    #[test]
    fn test_scoreboard_goal_and_best() {
        let board = Scoreboard::with_goal([10.0, 0.0, 0.0]);
        assert_eq!(board.best(), None);

        board.record("near", [9.0, 0.0, 0.0], None);
        board.record("far", [0.0, 0.0, 0.0], None);
        board.record("mid", [10.0, 3.0, 4.0], None);

        let (name, sample) = board.best().unwrap();
        assert_eq!(name, "near");
        assert_relative_eq!(sample.distance, 1.0);
        assert_relative_eq!(board.get("mid").unwrap().distance, 5.0);
        assert_relative_eq!(board.mean_distance().unwrap(), 16.0 / 3.0);
    }

    #[test]
    fn test_scoreboard_clones_share_state() {
        let writer = Scoreboard::new();
        let reader = writer.clone();

        writer.record("x", [1.0, 0.0, 0.0], None);
        assert_eq!(reader.snapshot().len(), 1);
    }

    #[test]
    fn test_scoreboard_concurrent_writers() {
        let board = Scoreboard::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let board = board.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        board.record(&format!("cube{}", i % 2), [1.0, 1.0, 1.0], None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: u64 = board.snapshot().values().map(|s| s.pulses).sum();
        assert_eq!(total, 800);
    }
}
