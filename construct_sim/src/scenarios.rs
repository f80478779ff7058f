//! End-to-end scenarios exercising the controller against the simulation server.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// CS-001: spawn, unfreeze, pulse at a fixed rate, destroy
    SwarmPulse,

    /// CS-002: server honors one despawn per listing; destroy must converge
    Nuke,

    /// CS-003: server ignores despawns; destroy must give up after its budget
    Stubborn,

    /// CS-004: state replies arrive truncated; pulses fail but cubes survive
    SlowServer,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SwarmPulse,
            ScenarioId::Nuke,
            ScenarioId::Stubborn,
            ScenarioId::SlowServer,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SwarmPulse => "swarm_pulse",
            ScenarioId::Nuke => "nuke",
            ScenarioId::Stubborn => "stubborn",
            ScenarioId::SlowServer => "slow_server",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SwarmPulse => {
                "Spawn N cubes, unfreeze, pulse at R/s for D seconds, destroy"
            }
            ScenarioId::Nuke => "One despawn honored per list request, verify destroy convergence",
            ScenarioId::Stubborn => "All despawns ignored, verify destroy stops after 5 passes",
            ScenarioId::SlowServer => {
                "Truncated state replies, verify parse errors keep cubes active"
            }
        }
    }

    /// Returns true if the scenario only works against the in-process server.
    pub fn needs_fault_injection(&self) -> bool {
        !matches!(self, ScenarioId::SwarmPulse)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "swarm_pulse" | "swarmpulse" | "pulse" | "cs-001" => Ok(ScenarioId::SwarmPulse),
            "nuke" | "cs-002" => Ok(ScenarioId::Nuke),
            "stubborn" | "cs-003" => Ok(ScenarioId::Stubborn),
            "slow_server" | "slowserver" | "cs-004" => Ok(ScenarioId::SlowServer),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
