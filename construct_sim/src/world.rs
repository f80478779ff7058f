//! SimWorld - the simulation harness container.

use crate::context::SimContext;
use crate::server::{SimServer, SimServerConfig};

use construct_core::{ClampRange, Construct, DecisionFn, LinearPolicy};
use construct_env::ConnectionConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Seed for spawn positions
    pub seed: u64,

    /// Number of cubes to create
    pub num_cubes: usize,

    /// Clamp bounds for every cube
    pub clamp: ClampRange,

    /// Half-width of the cube spawn area
    pub spawn_extent: f64,

    /// Client read deadline
    pub read_timeout: Duration,

    /// Server parameters
    pub server: SimServerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_cubes: 5,
            clamp: ClampRange::default(),
            spawn_extent: 10.0,
            read_timeout: Duration::from_secs(3),
            server: SimServerConfig::default(),
        }
    }
}

/// The SimWorld - a running server plus the virtual clock a construct runs on.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// In-process cube server
    pub server: SimServer,
}

impl SimWorld {
    /// Starts the server on a loopback port.
    pub async fn start(config: SimConfig) -> io::Result<Self> {
        let server = SimServer::start(config.server.clone()).await?;
        Ok(Self {
            config,
            context: SimContext::shared(),
            server,
        })
    }

    /// Client parameters for this world's server.
    pub fn connection_config(&self) -> ConnectionConfig {
        self.server
            .connection_config()
            .with_read_timeout(self.config.read_timeout)
    }

    /// An empty construct on the virtual clock.
    pub fn construct(&self) -> Construct<SimContext> {
        Construct::with_context(
            self.context.clone(),
            self.connection_config(),
            self.config.clamp,
        )
    }

    /// A construct holding `num_cubes` unspawned cubes.
    ///
    /// Positions are drawn from the seed; every cube seeks the origin.
    pub fn populated_construct(&self) -> Construct<SimContext> {
        let mut construct = self.construct();
        let policy: Arc<dyn DecisionFn> = Arc::new(LinearPolicy::seek([0.0; 3], 2.0));
        let positions = spawn_positions(
            self.config.seed,
            self.config.num_cubes,
            self.config.spawn_extent,
        );
        for (i, position) in positions.into_iter().enumerate() {
            construct.add_cube(format!("cube{}", i), position, policy.clone());
        }
        construct
    }
}

/// Deterministic spawn positions in `[-extent, extent]^3`.
pub fn spawn_positions(seed: u64, count: usize, extent: f64) -> Vec<[f64; 3]> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let extent = extent.abs();
    (0..count)
        .map(|_| {
            if extent == 0.0 {
                [0.0; 3]
            } else {
                [
                    rng.gen_range(-extent..=extent),
                    rng.gen_range(-extent..=extent),
                    rng.gen_range(-extent..=extent),
                ]
            }
        })
        .collect()
}
