//! Cube handle - one remotely simulated entity and its owned connection.
//!
//! # Lifecycle
//!
//! ```text
//!  Unspawned ──spawn()──► Active ──despawn() / connection error──► Terminated
//!                          (owns one connection, name gets "_BASE")
//! ```
//!
//! There is no way back to `Unspawned`. Pulse and refresh need `Active`
//! and fail without touching the network otherwise.

use crate::clamp::ClampRange;
use crate::decision::DecisionFn;
use crate::error::CubeError;

use construct_env::{
    Command, ConnectionConfig, FramedConnection, Vec3, WireError, BASE_SUFFIX, ZERO_ROTATION,
};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Observable lifecycle state of a cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeStatus {
    Unspawned,
    Active,
    Terminated,
}

impl fmt::Display for CubeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CubeStatus::Unspawned => "unspawned",
            CubeStatus::Active => "active",
            CubeStatus::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// State-tagged ownership of the cube's connection.
enum Link {
    Unspawned,
    Active(FramedConnection),
    Terminated,
}

/// A controllable cube.
pub struct Cube {
    /// Display name; gains `BASE_SUFFIX` on spawn
    name: String,

    /// Last known position (spawn position until the first refresh)
    position: Vec3,

    /// Bounds for every outgoing force component
    clamp: ClampRange,

    /// Shared decision capability, never mutated by the cube
    decision: Arc<dyn DecisionFn>,

    /// Parameters for opening sessions
    config: ConnectionConfig,

    link: Link,
}

impl fmt::Debug for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cube")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("clamp", &self.clamp)
            .field("status", &self.status())
            .finish()
    }
}

impl Cube {
    /// Creates an unspawned cube.
    pub fn new(
        name: impl Into<String>,
        position: Vec3,
        decision: Arc<dyn DecisionFn>,
        config: ConnectionConfig,
        clamp: ClampRange,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            clamp,
            decision,
            config,
            link: Link::Unspawned,
        }
    }

    /// Returns the cube's current name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the last known position.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Returns the clamp bounds.
    pub fn clamp(&self) -> ClampRange {
        self.clamp
    }

    /// Returns the lifecycle state.
    pub fn status(&self) -> CubeStatus {
        match self.link {
            Link::Unspawned => CubeStatus::Unspawned,
            Link::Active(_) => CubeStatus::Active,
            Link::Terminated => CubeStatus::Terminated,
        }
    }

    /// Returns true if the cube owns a live connection.
    pub fn is_active(&self) -> bool {
        matches!(self.link, Link::Active(_))
    }

    /// Spawns the cube on the server and keeps the session as its own.
    ///
    /// On success the name gains `BASE_SUFFIX`. On failure the cube stays
    /// unspawned and the session is closed.
    pub async fn spawn(&mut self) -> Result<(), CubeError> {
        if !matches!(self.link, Link::Unspawned) {
            return Err(CubeError::InvalidState {
                cube: self.name.clone(),
                operation: "spawn",
                status: self.status(),
            });
        }

        let mut conn = self.config.open().await.map_err(|source| CubeError::Connect {
            cube: self.name.clone(),
            operation: "spawn",
            source,
        })?;

        let command = Command::SpawnCube {
            cube_name: self.name.clone(),
            position: self.position,
            rotation: ZERO_ROTATION,
            is_base: true,
        };
        conn.send(&command).await.map_err(|source| CubeError::Send {
            cube: self.name.clone(),
            operation: "spawn",
            source,
        })?;

        self.link = Link::Active(conn);
        self.name.push_str(BASE_SUFFIX);

        info!(
            cube = %self.name,
            "Spawned cube at position [{:.2}, {:.2}, {:.2}]",
            self.position[0], self.position[1], self.position[2]
        );
        Ok(())
    }

    /// Despawns the cube over a separate, short-lived session.
    ///
    /// On success the cube is terminated and its owned connection dropped.
    pub async fn despawn(&mut self) -> Result<(), CubeError> {
        let mut conn = self.config.open().await.map_err(|source| CubeError::Connect {
            cube: self.name.clone(),
            operation: "despawn",
            source,
        })?;

        let command = Command::DespawnCube {
            cube_name: self.name.clone(),
        };
        conn.send(&command).await.map_err(|source| CubeError::Send {
            cube: self.name.clone(),
            operation: "despawn",
            source,
        })?;
        drop(conn);

        self.link = Link::Terminated;
        info!(cube = %self.name, "Despawned cube");
        Ok(())
    }

    /// Runs one control cycle: decide, clamp, `apply_force`, refresh.
    ///
    /// Returns the first error; nothing is retried.
    pub async fn pulse(&mut self) -> Result<(), CubeError> {
        if !self.is_active() {
            return Err(self.no_connection());
        }

        let force = self.compute_force()?;
        self.send_owned("apply_force", &Command::ApplyForce { force }).await?;
        self.refresh_position().await
    }

    /// Asks the server for this cube's state and adopts its position.
    ///
    /// Non-numeric components are skipped and keep their previous value.
    pub async fn refresh_position(&mut self) -> Result<(), CubeError> {
        self.send_owned("get_cube_state", &Command::GetCubeState).await?;

        let received = match &mut self.link {
            Link::Active(conn) => conn.receive().await,
            _ => return Err(self.no_connection()),
        };
        let frame = match received {
            Ok(frame) => frame,
            Err(source) => return Err(self.connection_lost_on_read(source)),
        };

        let state: Map<String, Value> = frame.parse().map_err(|source| CubeError::Parse {
            cube: self.name.clone(),
            source,
        })?;
        let components = parse_position(&state).map_err(|reason| CubeError::Shape {
            cube: self.name.clone(),
            reason,
        })?;

        for (slot, component) in self.position.iter_mut().zip(components) {
            if let Some(value) = component {
                *slot = value;
            }
        }
        Ok(())
    }

    /// Runs the decision function on the current position and clamps the result.
    pub fn compute_force(&self) -> Result<Vec3, CubeError> {
        let output = self.decision.decide(self.position);
        if output.len() < 3 {
            return Err(CubeError::DecisionTooShort {
                cube: self.name.clone(),
                len: output.len(),
            });
        }

        let mut force = [0.0; 3];
        for (index, slot) in force.iter_mut().enumerate() {
            let raw = output[index];
            if raw.is_nan() {
                return Err(CubeError::DecisionNotANumber {
                    cube: self.name.clone(),
                    index,
                });
            }
            *slot = self.clamp.apply(raw);
        }
        Ok(force)
    }

    async fn send_owned(
        &mut self,
        operation: &'static str,
        command: &Command,
    ) -> Result<(), CubeError> {
        let sent = match &mut self.link {
            Link::Active(conn) => conn.send(command).await,
            _ => return Err(self.no_connection()),
        };

        sent.map_err(|source| {
            if source.is_connection_lost() {
                self.terminate(operation, &source);
            }
            CubeError::Send {
                cube: self.name.clone(),
                operation,
                source,
            }
        })
    }

    fn connection_lost_on_read(&mut self, source: WireError) -> CubeError {
        self.terminate("get_cube_state", &source);
        CubeError::Read {
            cube: self.name.clone(),
            source,
        }
    }

    fn terminate(&mut self, operation: &str, cause: &WireError) {
        warn!(cube = %self.name, operation, error = %cause, "connection lost; cube terminated");
        self.link = Link::Terminated;
    }

    fn no_connection(&self) -> CubeError {
        CubeError::NoConnection {
            cube: self.name.clone(),
        }
    }
}

/// Extracts the three `position` components from a state reply.
///
/// A component that is not a number comes back as `None`.
fn parse_position(state: &Map<String, Value>) -> Result<[Option<f64>; 3], String> {
    let position = state
        .get("position")
        .ok_or_else(|| "missing `position`".to_string())?;
    let components = position
        .as_array()
        .ok_or_else(|| format!("`position` is not an array: {}", position))?;
    if components.len() != 3 {
        return Err(format!(
            "`position` has {} components, expected 3",
            components.len()
        ));
    }

    Ok([
        components[0].as_f64(),
        components[1].as_f64(),
        components[2].as_f64(),
    ])
}
