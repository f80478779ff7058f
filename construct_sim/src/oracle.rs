//! Ground truth oracle for the simulation server.
//!
//! The Oracle maintains the server's view of every cube:
//! - True positions and velocities
//! - Frozen flags (a frozen cube ignores forces)
//! - Reported positions (optionally noisy)

use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

use construct_env::{Vec3, BASE_SUFFIX};

/// A ground truth cube on the server.
#[derive(Debug, Clone)]
pub struct SimCube {
    /// Position [x, y, z]
    pub position: Vector3<f64>,

    /// Velocity [vx, vy, vz]
    pub velocity: Vector3<f64>,

    /// Frozen cubes keep their position regardless of force
    pub frozen: bool,

    /// Last force applied, after the server received it
    pub last_force: Vector3<f64>,

    /// Forces applied since spawn
    pub forces_applied: u64,
}

impl SimCube {
    /// Creates a resting cube at `position`.
    pub fn new(position: Vector3<f64>, frozen: bool) -> Self {
        Self {
            position,
            velocity: Vector3::zeros(),
            frozen,
            last_force: Vector3::zeros(),
            forces_applied: 0,
        }
    }
}

/// The Oracle - cube registry plus unit-mass kinematics.
pub struct Oracle {
    /// Cubes by canonical name (ordered, so listings are stable)
    cubes: BTreeMap<String, SimCube>,

    /// Integration step applied per force (seconds)
    physics_step: f64,

    /// Whether newly spawned cubes start frozen
    frozen_on_spawn: bool,

    /// RNG for reported-position noise
    noise_rng: ChaCha8Rng,

    /// Reported-position noise standard deviation (0 = exact)
    position_noise_std: f64,

    /// Largest absolute force component ever received
    max_force_component: f64,
}

impl Oracle {
    /// Creates an empty Oracle.
    ///
    /// # Arguments
    /// * `seed` - Seed for reported-position noise
    /// * `physics_step` - Seconds integrated per `apply_force`
    /// * `frozen_on_spawn` - Whether spawned cubes start frozen
    pub fn new(seed: u64, physics_step: f64, frozen_on_spawn: bool) -> Self {
        Self {
            cubes: BTreeMap::new(),
            physics_step,
            frozen_on_spawn,
            noise_rng: ChaCha8Rng::seed_from_u64(seed),
            position_noise_std: 0.0,
            max_force_component: 0.0,
        }
    }

    /// Sets the reported-position noise standard deviation.
    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.position_noise_std = std_dev.max(0.0);
    }

    /// Spawns a cube and returns its canonical name.
    ///
    /// Base cubes get `_BASE` appended. Spawning over an existing name
    /// replaces that cube.
    pub fn spawn(&mut self, name: &str, position: Vec3, is_base: bool) -> String {
        let canonical = if is_base {
            format!("{}{}", name, BASE_SUFFIX)
        } else {
            name.to_string()
        };
        self.cubes.insert(
            canonical.clone(),
            SimCube::new(Vector3::from(position), self.frozen_on_spawn),
        );
        canonical
    }

    /// Removes a cube. Returns false if it did not exist.
    pub fn despawn(&mut self, name: &str) -> bool {
        self.cubes.remove(name).is_some()
    }

    /// Sets a cube's frozen flag. Returns false if it does not exist.
    pub fn set_frozen(&mut self, name: &str, frozen: bool) -> bool {
        match self.cubes.get_mut(name) {
            Some(cube) => {
                cube.frozen = frozen;
                if frozen {
                    cube.velocity = Vector3::zeros();
                }
                true
            }
            None => false,
        }
    }

    /// Applies a force to a cube and integrates one physics step.
    ///
    /// Returns false if the cube does not exist. Frozen cubes record the
    /// force but do not move.
    pub fn apply_force(&mut self, name: &str, force: Vec3) -> bool {
        let force = Vector3::from(force);
        self.max_force_component = self.max_force_component.max(force.amax());

        let dt = self.physics_step;
        match self.cubes.get_mut(name) {
            Some(cube) => {
                cube.last_force = force;
                cube.forces_applied += 1;
                if !cube.frozen {
                    // Unit mass: a = F
                    cube.velocity += force * dt;
                    cube.position += cube.velocity * dt;
                }
                true
            }
            None => false,
        }
    }

    /// Returns the position the server reports for a cube (noise added).
    pub fn observe(&mut self, name: &str) -> Option<Vec3> {
        let position = self.cubes.get(name)?.position;

        if self.position_noise_std > 0.0 {
            if let Ok(noise) = Normal::new(0.0, self.position_noise_std) {
                let jitter = Vector3::new(
                    noise.sample(&mut self.noise_rng),
                    noise.sample(&mut self.noise_rng),
                    noise.sample(&mut self.noise_rng),
                );
                return Some(to_array(position + jitter));
            }
        }
        Some(to_array(position))
    }

    /// Returns a cube's ground truth.
    pub fn get(&self, name: &str) -> Option<&SimCube> {
        self.cubes.get(name)
    }

    /// Canonical names of every cube, sorted.
    pub fn names(&self) -> Vec<String> {
        self.cubes.keys().cloned().collect()
    }

    /// Number of cubes.
    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    /// Returns true if no cube exists.
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    /// Largest absolute force component received so far.
    pub fn max_force_component(&self) -> f64 {
        self.max_force_component
    }
}

fn to_array(v: Vector3<f64>) -> Vec3 {
    [v.x, v.y, v.z]
}
