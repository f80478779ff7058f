//! Decision functions: map a cube's observed position to a control action.
//!
//! The controller treats a decision function as a black box with a fixed
//! contract: three numbers in, at least three numbers out. Only the first
//! three outputs are used.

use construct_env::Vec3;
use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// An injected decision capability shared by any number of cubes.
///
/// Implementations must be deterministic for a given input and must not rely
/// on being called from a particular task.
pub trait DecisionFn: Send + Sync {
    /// Produces the raw (unclamped) action for `input`.
    fn decide(&self, input: Vec3) -> Vec<f64>;
}

impl<F> DecisionFn for F
where
    F: Fn(Vec3) -> Vec<f64> + Send + Sync,
{
    fn decide(&self, input: Vec3) -> Vec<f64> {
        self(input)
    }
}

/// An affine policy: `action = W * position + b`.
///
/// Equivalent to a single dense layer without activation.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPolicy {
    weights: Matrix3<f64>,
    bias: Vector3<f64>,
}

impl LinearPolicy {
    /// Creates a policy from explicit weights and bias.
    pub fn new(weights: Matrix3<f64>, bias: Vector3<f64>) -> Self {
        Self { weights, bias }
    }

    /// A proportional controller pulling towards `target`.
    ///
    /// `action = gain * (target - position)`
    pub fn seek(target: Vec3, gain: f64) -> Self {
        Self {
            weights: Matrix3::identity() * -gain,
            bias: Vector3::from(target) * gain,
        }
    }

    /// Random weights and bias drawn uniformly from `[-scale, scale]`.
    ///
    /// The same seed always yields the same policy.
    pub fn random(seed: u64, scale: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = scale.abs();
        let mut draw = || {
            if scale == 0.0 {
                0.0
            } else {
                rng.gen_range(-scale..=scale)
            }
        };

        let weights = Matrix3::from_fn(|_, _| draw());
        let bias = Vector3::from_fn(|_, _| draw());
        Self { weights, bias }
    }

    /// Returns the weight matrix.
    pub fn weights(&self) -> &Matrix3<f64> {
        &self.weights
    }

    /// Returns the bias vector.
    pub fn bias(&self) -> &Vector3<f64> {
        &self.bias
    }
}

impl DecisionFn for LinearPolicy {
    fn decide(&self, input: Vec3) -> Vec<f64> {
        let action = self.weights * Vector3::from(input) + self.bias;
        action.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    #[test]
    fn test_closure_is_a_decision_fn() {
        let double: Arc<dyn DecisionFn> =
            Arc::new(|p: Vec3| p.iter().map(|v| v * 2.0).collect::<Vec<f64>>());
        assert_eq!(double.decide([1.0, -2.0, 0.5]), vec![2.0, -4.0, 1.0]);
    }

    #[test]
    fn test_seek_policy_points_at_target() {
        let policy = LinearPolicy::seek([10.0, 0.0, -10.0], 0.5);
        let action = policy.decide([0.0, 0.0, 0.0]);

        assert_relative_eq!(action[0], 5.0);
        assert_relative_eq!(action[1], 0.0);
        assert_relative_eq!(action[2], -5.0);

        // At the target the action vanishes
        let at_target = policy.decide([10.0, 0.0, -10.0]);
        for v in at_target {
            assert_relative_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_random_policy_is_seeded() {
        let a = LinearPolicy::random(7, 1.0);
        let b = LinearPolicy::random(7, 1.0);
        let c = LinearPolicy::random(8, 1.0);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.weights().iter().all(|w| w.abs() <= 1.0));
        assert_eq!(a.decide([1.0, 2.0, 3.0]).len(), 3);
    }

    #[test]
    fn test_random_policy_zero_scale() {
        let policy = LinearPolicy::random(1, 0.0);
        assert_eq!(policy.decide([4.0, 5.0, 6.0]), vec![0.0, 0.0, 0.0]);
    }
}
