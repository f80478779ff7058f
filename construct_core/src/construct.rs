//! Construct - the ordered cube set and its batch operations.
//!
//! Every batch operation opens its own short-lived session and never touches
//! a cube's owned connection.
//!
//! # Retry model
//!
//! `unfreeze_all` and `destroy_all` run list-then-act passes under a
//! `RetryPolicy`. Two stop conditions are kept apart:
//! - **Convergence**: the server reports an empty list (`Termination::Converged`)
//! - **Budget**: `max_attempts` passes ran without seeing an empty list
//!   (`Termination::Exhausted`)

use crate::clamp::ClampRange;
use crate::cube::Cube;
use crate::decision::DecisionFn;
use crate::error::{ConstructError, CubeError};
use crate::scoreboard::Scoreboard;

use construct_env::{
    Command, ConnectionConfig, ConstructContext, FramedConnection, TokioContext, Vec3,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Bounded list-then-act loop parameters.
///
/// Loads from JSON as `{"max_attempts": 5, "pause_ms": 500}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of passes
    pub max_attempts: u32,

    /// Pause between passes (not taken after the last one)
    #[serde(rename = "pause_ms", with = "millis")]
    pub pause: Duration,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(pause: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(pause.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl RetryPolicy {
    /// Policy used by `destroy_all`.
    pub const DESTROY: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        pause: Duration::from_millis(500),
    };

    /// Policy used by `unfreeze_all`.
    pub const UNFREEZE: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        pause: Duration::from_millis(200),
    };
}

/// Why a list-then-act loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The server reported no cubes
    Converged,

    /// Every attempt was used; `last_seen` cubes were listed on the final pass
    Exhausted { last_seen: usize },
}

/// Result of a list-then-act loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// List requests made (including the one that came back empty)
    pub attempts: u32,

    /// Stop condition
    pub termination: Termination,
}

impl BatchOutcome {
    /// Returns true if an empty list ended the loop.
    pub fn is_converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Result of a per-cube batch (`spawn_all`, `despawn_all`).
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Cubes the operation succeeded on
    pub succeeded: usize,

    /// One error per failed cube, in collection order
    pub failures: Vec<CubeError>,
}

impl BatchReport {
    /// Returns true if no cube failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An ordered set of cubes sharing connection parameters.
///
/// Generic over the context so retry pauses and the pulsing clock can run on
/// a virtual clock.
pub struct Construct<Ctx = TokioContext>
where
    Ctx: ConstructContext,
{
    /// Clock and task spawner
    pub(crate) context: Arc<Ctx>,

    /// Parameters for batch sessions and new cubes
    config: ConnectionConfig,

    /// Default clamp bounds for new cubes
    clamp: ClampRange,

    /// Cubes in insertion order
    pub(crate) cubes: Vec<Cube>,

    /// Optional per-tick aggregate for observers
    pub(crate) scoreboard: Option<Scoreboard>,
}

impl Construct<TokioContext> {
    /// Creates an empty construct on the wall clock.
    pub fn new(config: ConnectionConfig, clamp: ClampRange) -> Self {
        Self::with_context(TokioContext::shared(), config, clamp)
    }
}

impl<Ctx> Construct<Ctx>
where
    Ctx: ConstructContext,
{
    /// Creates an empty construct on the given context.
    pub fn with_context(context: Arc<Ctx>, config: ConnectionConfig, clamp: ClampRange) -> Self {
        Self {
            context,
            config,
            clamp,
            cubes: Vec::new(),
            scoreboard: None,
        }
    }

    /// Attaches a scoreboard updated at every pulsing tick.
    pub fn with_scoreboard(mut self, scoreboard: Scoreboard) -> Self {
        self.scoreboard = Some(scoreboard);
        self
    }

    /// Returns the connection parameters.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns the default clamp bounds.
    pub fn clamp(&self) -> ClampRange {
        self.clamp
    }

    /// Returns the context.
    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    /// Returns the attached scoreboard, if any.
    pub fn scoreboard(&self) -> Option<&Scoreboard> {
        self.scoreboard.as_ref()
    }

    /// Returns the cubes in insertion order.
    pub fn cubes(&self) -> &[Cube] {
        &self.cubes
    }

    /// Returns the cubes mutably.
    pub fn cubes_mut(&mut self) -> &mut [Cube] {
        &mut self.cubes
    }

    /// Number of cubes.
    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    /// Returns true if the construct holds no cubes.
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    /// Appends an existing cube.
    pub fn push(&mut self, cube: Cube) {
        self.cubes.push(cube);
    }

    /// Creates a cube with this construct's connection and clamp defaults.
    pub fn add_cube(
        &mut self,
        name: impl Into<String>,
        position: Vec3,
        decision: Arc<dyn DecisionFn>,
    ) -> &mut Cube {
        let cube = Cube::new(name, position, decision, self.config.clone(), self.clamp);
        self.cubes.push(cube);
        let last = self.cubes.len() - 1;
        &mut self.cubes[last]
    }

    /// Spawns every cube in order. A failure never stops the rest.
    pub async fn spawn_all(&mut self) -> BatchReport {
        let mut report = BatchReport::default();
        for cube in &mut self.cubes {
            match cube.spawn().await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(error = %e, "[SpawnAll] spawn failed");
                    report.failures.push(e);
                }
            }
        }
        info!(
            spawned = report.succeeded,
            failed = report.failures.len(),
            "[SpawnAll] finished"
        );
        report
    }

    /// Despawns every cube in order. A failure never stops the rest.
    pub async fn despawn_all(&mut self) -> BatchReport {
        let mut report = BatchReport::default();
        for cube in &mut self.cubes {
            match cube.despawn().await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(error = %e, "[DespawnAll] despawn failed");
                    report.failures.push(e);
                }
            }
        }
        report
    }

    /// Returns the names of every cube on the server.
    ///
    /// Entries that are not strings are dropped silently.
    pub async fn cube_names(&self) -> Result<Vec<String>, ConstructError> {
        const OPERATION: &str = "GetAllCubeNames";
        let mut conn = self.open_session(OPERATION).await?;
        request_cube_names(&mut conn, OPERATION).await
    }

    /// Releases every listed cube, up to `RetryPolicy::UNFREEZE` passes.
    pub async fn unfreeze_all(&self) -> Result<BatchOutcome, ConstructError> {
        self.unfreeze_all_with(RetryPolicy::UNFREEZE).await
    }

    /// `unfreeze_all` with an explicit policy.
    pub async fn unfreeze_all_with(
        &self,
        policy: RetryPolicy,
    ) -> Result<BatchOutcome, ConstructError> {
        self.list_passes("UnfreezeAll", policy, |cube_name| Command::FreezeCube {
            cube_name,
            freeze: false,
        })
        .await
    }

    /// Despawns every listed cube until the server reports none, up to
    /// `RetryPolicy::DESTROY` passes.
    pub async fn destroy_all(&self) -> Result<BatchOutcome, ConstructError> {
        self.destroy_all_with(RetryPolicy::DESTROY).await
    }

    /// `destroy_all` with an explicit policy.
    pub async fn destroy_all_with(
        &self,
        policy: RetryPolicy,
    ) -> Result<BatchOutcome, ConstructError> {
        let outcome = self
            .list_passes("Nuke", policy, |cube_name| Command::DespawnCube { cube_name })
            .await?;

        match outcome.termination {
            Termination::Converged => {
                info!(attempts = outcome.attempts, "[Nuke] All cubes cleared.")
            }
            Termination::Exhausted { last_seen } => warn!(
                attempts = outcome.attempts,
                last_seen,
                "[Nuke] Finished without convergence."
            ),
        }
        Ok(outcome)
    }

    async fn open_session(
        &self,
        operation: &'static str,
    ) -> Result<FramedConnection, ConstructError> {
        self.config
            .open()
            .await
            .map_err(|source| ConstructError::Connect { operation, source })
    }

    /// One session, up to `policy.max_attempts` list-then-act passes.
    async fn list_passes<F>(
        &self,
        operation: &'static str,
        policy: RetryPolicy,
        action: F,
    ) -> Result<BatchOutcome, ConstructError>
    where
        F: Fn(String) -> Command,
    {
        let mut conn = self.open_session(operation).await?;
        let mut last_seen = 0;

        for attempt in 1..=policy.max_attempts {
            let names = request_cube_names(&mut conn, operation).await?;
            if names.is_empty() {
                info!(operation, attempt, "no cubes listed");
                return Ok(BatchOutcome {
                    attempts: attempt,
                    termination: Termination::Converged,
                });
            }

            let mut failed = 0usize;
            for name in &names {
                let command = action(name.clone());
                if let Err(e) = conn.send(&command).await {
                    warn!(operation, cube = %name, error = %e, "{} failed", command.kind());
                    failed += 1;
                }
            }

            info!(operation, attempt, cubes = names.len(), failed, "pass complete");
            last_seen = names.len();

            if attempt < policy.max_attempts {
                self.context.sleep(policy.pause).await;
            }
        }

        Ok(BatchOutcome {
            attempts: policy.max_attempts,
            termination: Termination::Exhausted { last_seen },
        })
    }
}

/// Sends `get_cube_list` on an open session and extracts the names.
async fn request_cube_names(
    conn: &mut FramedConnection,
    operation: &'static str,
) -> Result<Vec<String>, ConstructError> {
    conn.send(&Command::GetCubeList)
        .await
        .map_err(|source| ConstructError::ListRequest { operation, source })?;

    let frame = conn
        .receive()
        .await
        .map_err(|source| ConstructError::ListRead { operation, source })?;

    let reply: Map<String, Value> = frame
        .parse()
        .map_err(|source| ConstructError::ListParse { operation, source })?;

    Ok(string_list(reply.get("cubes")))
}

/// Keeps only the string entries of a JSON array; anything else yields nothing.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_list_drops_non_strings() {
        let value = json!(["a_BASE", 3, null, "b_BASE", ["nested"]]);
        assert_eq!(string_list(Some(&value)), vec!["a_BASE", "b_BASE"]);
    }

    #[test]
    fn test_string_list_missing_or_wrong_type() {
        assert!(string_list(None).is_empty());
        assert!(string_list(Some(&json!("a"))).is_empty());
        assert!(string_list(Some(&json!({ "a": 1 }))).is_empty());
    }

    #[test]
    fn test_retry_policies() {
        assert_eq!(RetryPolicy::DESTROY.max_attempts, 5);
        assert_eq!(RetryPolicy::DESTROY.pause, Duration::from_millis(500));
        assert_eq!(RetryPolicy::UNFREEZE.max_attempts, 3);
        assert_eq!(RetryPolicy::UNFREEZE.pause, Duration::from_millis(200));
    }

    #[test]
    fn test_retry_policy_from_json() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts":2,"pause_ms":50}"#).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.pause, Duration::from_millis(50));

        let value = serde_json::to_value(RetryPolicy::DESTROY).unwrap();
        assert_eq!(value, json!({ "max_attempts": 5, "pause_ms": 500 }));
    }

    #[test]
    fn test_add_cube_uses_construct_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:1", "pw");
        let clamp = ClampRange::new(-1.0, 1.0);
        let mut construct = Construct::new(config.clone(), clamp);

        let decision: Arc<dyn DecisionFn> = Arc::new(|p: Vec3| p.to_vec());
        construct.add_cube("a", [0.0; 3], decision.clone());
        construct.add_cube("a", [1.0; 3], decision);

        // Duplicate names are the server's concern
        assert_eq!(construct.len(), 2);
        assert_eq!(construct.cubes()[1].position(), [1.0; 3]);
        assert_eq!(construct.cubes()[0].clamp(), clamp);
    }

    #[tokio::test]
    async fn test_batch_ops_report_connect_failure() {
        let config = ConnectionConfig::new("127.0.0.1:1", "pw");
        let construct = Construct::new(config, ClampRange::default());

        let err = construct.cube_names().await.unwrap_err();
        assert!(matches!(err, ConstructError::Connect { operation: "GetAllCubeNames", .. }));

        let err = construct.destroy_all().await.unwrap_err();
        assert!(matches!(err, ConstructError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_spawn_all_keeps_going_after_failures() {
        let config = ConnectionConfig::new("127.0.0.1:1", "pw");
        let mut construct = Construct::new(config, ClampRange::default());
        let decision: Arc<dyn DecisionFn> = Arc::new(|p: Vec3| p.to_vec());
        construct.add_cube("a", [0.0; 3], decision.clone());
        construct.add_cube("b", [0.0; 3], decision);

        let report = construct.spawn_all().await;
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[1].cube(), "b");
    }
}
