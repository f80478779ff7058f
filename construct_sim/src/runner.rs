//! Scenario runner - executes end-to-end controller scenarios.

use crate::scenarios::ScenarioId;
use crate::world::{spawn_positions, SimConfig, SimWorld};

use construct_core::{
    ClampRange, Construct, CubeStatus, DecisionFn, LinearPolicy, RetryPolicy, Scoreboard,
    Termination,
};
use construct_env::{ConnectionConfig, ConstructContext, TokioContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final context time in seconds
    pub final_time_secs: f64,

    /// Cubes left on the server at the end
    pub final_cube_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Cubes spawned successfully
    pub cubes_spawned: usize,

    /// Pulses run to completion
    pub pulses: u64,

    /// Pulses that returned an error
    pub pulse_failures: u64,

    /// List requests seen by the server
    pub list_requests: u64,

    /// Despawn commands seen by the server
    pub despawns_sent: u64,

    /// Largest absolute force component the server received
    pub max_force: f64,

    /// Passes used by the final destroy
    pub destroy_attempts: u32,
}

/// Runs controller scenarios.
pub struct ScenarioRunner {
    /// Seed for spawn positions
    seed: u64,

    /// Number of cubes
    num_cubes: usize,

    /// Pulse rate
    rate: u32,

    /// Pulsing duration
    duration: Duration,

    /// Clamp bounds
    clamp: ClampRange,

    /// Real server for `swarm_pulse` (in-process server otherwise)
    external: Option<ConnectionConfig>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_cubes: usize) -> Self {
        Self {
            seed,
            num_cubes,
            rate: 100,
            duration: Duration::from_secs(5),
            clamp: ClampRange::default(),
            external: None,
        }
    }

    /// Sets the pulse rate.
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the pulsing duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the clamp bounds.
    pub fn with_clamp(mut self, clamp: ClampRange) -> Self {
        self.clamp = clamp;
        self
    }

    /// Runs `swarm_pulse` against a real server instead.
    pub fn with_external_server(mut self, config: ConnectionConfig) -> Self {
        self.external = Some(config);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        if self.external.is_some() && scenario.needs_fault_injection() {
            warn!("{} needs fault injection; using the in-process server", scenario.name());
        }

        match scenario {
            ScenarioId::SwarmPulse => match &self.external {
                Some(config) => self.run_swarm_pulse_external(config.clone()).await,
                None => self.run_swarm_pulse().await,
            },
            ScenarioId::Nuke => self.run_nuke().await,
            ScenarioId::Stubborn => self.run_stubborn().await,
            ScenarioId::SlowServer => self.run_slow_server().await,
        }
    }

    fn sim_config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            num_cubes: self.num_cubes,
            clamp: self.clamp,
            ..Default::default()
        }
    }

    fn result(&self, scenario: ScenarioId) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_cube_count: 0,
            failure_reason: None,
            metrics: ScenarioMetrics::default(),
        }
    }

    async fn start_world(
        &self,
        scenario: ScenarioId,
        config: SimConfig,
    ) -> Result<SimWorld, ScenarioResult> {
        SimWorld::start(config).await.map_err(|e| {
            let mut result = self.result(scenario);
            result.failure_reason = Some(format!("server failed to start: {}", e));
            result
        })
    }

    /// CS-001: SwarmPulse - full lifecycle at a fixed rate.
    ///
    /// **Assertion**: ticks = ⌈duration × rate⌉ (±1), every cube pulsed on
    /// every tick without error, no force component outside the clamp, and the
    /// final destroy converges on an empty server.
    async fn run_swarm_pulse(&self) -> ScenarioResult {
        info!("CS-001: SwarmPulse - fixed-rate pulsing");
        let scenario = ScenarioId::SwarmPulse;
        let world = match self.start_world(scenario, self.sim_config()).await {
            Ok(world) => world,
            Err(result) => return result,
        };

        let scoreboard = Scoreboard::new();
        let mut construct = world.populated_construct().with_scoreboard(scoreboard.clone());
        let mut result = self.result(scenario);
        let mut failures = Vec::new();

        match self.swarm_lifecycle(&mut construct, &mut result).await {
            Ok(()) => {}
            Err(reason) => failures.push(reason),
        }

        let stats = world.server.stats();
        result.metrics.list_requests = stats.list_requests;
        result.metrics.despawns_sent = stats.despawns_received;
        result.metrics.max_force = world.server.max_force_component();
        result.final_cube_count = world.server.cube_names().len();
        result.final_time_secs = world.context.now().as_secs_f64();

        let expected = expected_ticks(self.duration, self.rate);
        if result.total_ticks.abs_diff(expected) > 1 {
            failures.push(format!("{} ticks, expected {}", result.total_ticks, expected));
        }
        for (name, sample) in scoreboard.snapshot() {
            if sample.pulses != result.total_ticks {
                failures.push(format!("{} pulsed {} times", name, sample.pulses));
            }
        }
        if result.metrics.pulse_failures > 0 {
            failures.push(format!("{} pulses failed", result.metrics.pulse_failures));
        }
        let bound = self.clamp.min.abs().max(self.clamp.max.abs());
        if result.metrics.max_force > bound {
            failures.push(format!("force {:.3} outside clamp", result.metrics.max_force));
        }
        if result.final_cube_count != 0 {
            failures.push(format!("{} cubes left on server", result.final_cube_count));
        }

        if let Some(mean) = scoreboard.mean_distance() {
            debug!("mean distance from origin after pulsing: {:.3}", mean);
        }
        if let Some((name, sample)) = scoreboard.best() {
            debug!(cube = %name, "closest to goal: {:.3}", sample.distance);
        }
        finish(result, failures)
    }

    /// CS-001 against a real server: only lifecycle outcomes are checked.
    async fn run_swarm_pulse_external(&self, config: ConnectionConfig) -> ScenarioResult {
        info!("CS-001: SwarmPulse against {}", config.server_addr);
        let scenario = ScenarioId::SwarmPulse;
        let mut construct = Construct::<TokioContext>::new(config, self.clamp);
        let policy: Arc<dyn DecisionFn> = Arc::new(LinearPolicy::seek([0.0; 3], 2.0));
        for (i, position) in spawn_positions(self.seed, self.num_cubes, 10.0)
            .into_iter()
            .enumerate()
        {
            construct.add_cube(format!("cube{}", i), position, policy.clone());
        }

        let mut result = self.result(scenario);
        let mut failures = Vec::new();
        if let Err(reason) = self.swarm_lifecycle(&mut construct, &mut result).await {
            failures.push(reason);
        }
        result.final_time_secs = construct.context().now().as_secs_f64();
        finish(result, failures)
    }

    /// Spawn, unfreeze, pulse, destroy. Errors only on lifecycle failures.
    async fn swarm_lifecycle<Ctx: ConstructContext>(
        &self,
        construct: &mut Construct<Ctx>,
        result: &mut ScenarioResult,
    ) -> Result<(), String> {
        let report = construct.spawn_all().await;
        result.metrics.cubes_spawned = report.succeeded;
        if !report.is_complete() {
            return Err(format!("{} spawns failed", report.failures.len()));
        }

        // Read back initial state so every spawn is on the server before listing
        for cube in construct.cubes_mut() {
            cube.refresh_position().await.map_err(|e| e.to_string())?;
        }
        construct.unfreeze_all().await.map_err(|e| e.to_string())?;

        let summary = construct
            .start_pulsing(self.rate, self.duration)
            .await
            .map_err(|e| e.to_string())?;
        result.total_ticks = summary.ticks;
        result.metrics.pulses = summary.pulses;
        result.metrics.pulse_failures = summary.failures;
        info!(
            "  pulsed {} ticks, {} pulses, {} failed",
            summary.ticks, summary.pulses, summary.failures
        );

        let outcome = construct.destroy_all().await.map_err(|e| e.to_string())?;
        result.metrics.destroy_attempts = outcome.attempts;
        if !outcome.is_converged() {
            return Err(format!("destroy did not converge: {:?}", outcome.termination));
        }
        Ok(())
    }

    /// CS-002: Nuke - a server that drains slowly.
    ///
    /// **Assertion**: destroy converges in more than one pass but within budget.
    async fn run_nuke(&self) -> ScenarioResult {
        info!("CS-002: Nuke - destroy convergence");
        let scenario = ScenarioId::Nuke;
        let world = match self.start_world(scenario, self.sim_config()).await {
            Ok(world) => world,
            Err(result) => return result,
        };

        let count = self.num_cubes.max(1);
        for (i, position) in spawn_positions(self.seed, count, 10.0).into_iter().enumerate() {
            world.server.insert_cube(&format!("cube{}", i), position, true);
        }
        // Drain in three listings at most
        let per_list = count.div_ceil(3);
        world.server.faults().set_despawns_per_list(Some(per_list));

        let mut result = self.result(scenario);
        let mut failures = Vec::new();
        match world.construct().destroy_all().await {
            Ok(outcome) => {
                result.metrics.destroy_attempts = outcome.attempts;
                if !outcome.is_converged() {
                    failures.push(format!("no convergence after {} passes", outcome.attempts));
                }
                if count > per_list && outcome.attempts < 2 {
                    failures.push("converged in a single pass".to_string());
                }
            }
            Err(e) => failures.push(e.to_string()),
        }

        let stats = world.server.stats();
        result.metrics.list_requests = stats.list_requests;
        result.metrics.despawns_sent = stats.despawns_received;
        result.final_cube_count = world.server.cube_names().len();
        result.final_time_secs = world.context.now().as_secs_f64();
        if result.final_cube_count != 0 {
            failures.push(format!("{} cubes left on server", result.final_cube_count));
        }
        finish(result, failures)
    }

    /// CS-003: Stubborn - a server that never despawns.
    ///
    /// **Assertion**: exactly `DESTROY.max_attempts` list requests, outcome
    /// exhausted with every cube still listed.
    async fn run_stubborn(&self) -> ScenarioResult {
        info!("CS-003: Stubborn - destroy exhaustion");
        let scenario = ScenarioId::Stubborn;
        let world = match self.start_world(scenario, self.sim_config()).await {
            Ok(world) => world,
            Err(result) => return result,
        };

        let count = self.num_cubes.max(1);
        for i in 0..count {
            world.server.insert_cube(&format!("cube{}", i), [0.0; 3], true);
        }
        world.server.faults().set_ignore_despawns(true);

        let mut result = self.result(scenario);
        let mut failures = Vec::new();
        let budget = RetryPolicy::DESTROY.max_attempts;
        match world.construct().destroy_all().await {
            Ok(outcome) => {
                result.metrics.destroy_attempts = outcome.attempts;
                if outcome.termination != (Termination::Exhausted { last_seen: count }) {
                    failures.push(format!("unexpected termination {:?}", outcome.termination));
                }
            }
            Err(e) => failures.push(e.to_string()),
        }

        let stats = world.server.stats();
        result.metrics.list_requests = stats.list_requests;
        result.metrics.despawns_sent = stats.despawns_received;
        result.final_cube_count = world.server.cube_names().len();
        result.final_time_secs = world.context.now().as_secs_f64();

        if stats.list_requests != u64::from(budget) {
            failures.push(format!("{} list requests, expected {}", stats.list_requests, budget));
        }
        if stats.despawns_honored != 0 {
            failures.push(format!("{} despawns honored", stats.despawns_honored));
        }
        finish(result, failures)
    }

    /// CS-004: SlowServer - every state reply is truncated.
    ///
    /// **Assertion**: every pulse fails with a parse error, cubes stay active
    /// and keep their spawn positions.
    async fn run_slow_server(&self) -> ScenarioResult {
        info!("CS-004: SlowServer - truncated replies");
        let scenario = ScenarioId::SlowServer;
        let config = SimConfig {
            read_timeout: Duration::from_millis(100),
            ..self.sim_config()
        };
        let world = match self.start_world(scenario, config).await {
            Ok(world) => world,
            Err(result) => return result,
        };

        let mut construct = world.populated_construct();
        let mut result = self.result(scenario);
        let mut failures = Vec::new();

        let report = construct.spawn_all().await;
        result.metrics.cubes_spawned = report.succeeded;
        let spawned: Vec<[f64; 3]> = construct.cubes().iter().map(|c| c.position()).collect();

        world.server.faults().set_truncate_state_replies(true);
        // A few ticks are enough; each one waits out the read deadline
        match construct.start_pulsing(10, Duration::from_millis(300)).await {
            Ok(summary) => {
                result.total_ticks = summary.ticks;
                result.metrics.pulses = summary.pulses;
                result.metrics.pulse_failures = summary.failures;
                if summary.failures != summary.pulses {
                    failures.push(format!(
                        "{} of {} pulses succeeded",
                        summary.pulses - summary.failures,
                        summary.pulses
                    ));
                }
            }
            Err(e) => failures.push(e.to_string()),
        }
        world.server.faults().heal_all();

        for (cube, position) in construct.cubes().iter().zip(&spawned) {
            if cube.status() != CubeStatus::Active {
                failures.push(format!("{} is {}", cube.name(), cube.status()));
            }
            if cube.position() != *position {
                failures.push(format!("{} moved without a valid reply", cube.name()));
            }
        }

        if let Err(e) = construct.destroy_all().await {
            failures.push(e.to_string());
        }
        result.final_cube_count = world.server.cube_names().len();
        result.final_time_secs = world.context.now().as_secs_f64();
        finish(result, failures)
    }
}

/// ⌈duration × rate⌉
pub fn expected_ticks(duration: Duration, rate: u32) -> u64 {
    let interval = Duration::from_secs(1) / rate.max(1);
    let ticks = duration.as_nanos().div_ceil(interval.as_nanos());
    ticks as u64
}

fn finish(mut result: ScenarioResult, failures: Vec<String>) -> ScenarioResult {
    result.passed = failures.is_empty();
    if !result.passed {
        result.failure_reason = Some(failures.join("; "));
    }
    result
}
