//! Wire-level types shared by the controller and the simulation server.

use serde::{Deserialize, Serialize};

/// A position, force or rotation triple as it travels on the wire.
pub type Vec3 = [f64; 3];

/// Suffix the server appends to the name of a cube spawned with `is_base`.
pub const BASE_SUFFIX: &str = "_BASE";

/// Rotation sent with every spawn.
pub const ZERO_ROTATION: Vec3 = [0.0, 0.0, 0.0];

/// Commands understood by the cube server.
///
/// Serialized as a flat JSON object tagged by `type`:
///
/// ```text
/// {"type":"apply_force","force":[1.0,0.0,-2.5]}
/// {"type":"get_cube_list"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create a cube; the server renames base cubes with `BASE_SUFFIX`.
    SpawnCube {
        cube_name: String,
        position: Vec3,
        rotation: Vec3,
        is_base: bool,
    },

    /// Remove a cube by its server-side name.
    DespawnCube { cube_name: String },

    /// Push a force onto the cube spawned on this connection.
    ApplyForce { force: Vec3 },

    /// Ask for the state of the cube spawned on this connection.
    GetCubeState,

    /// Ask for the names of every cube on the server.
    GetCubeList,

    /// Freeze or release a cube.
    FreezeCube { cube_name: String, freeze: bool },
}

impl Command {
    /// Returns the wire name of the command (the `type` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Command::SpawnCube { .. } => "spawn_cube",
            Command::DespawnCube { .. } => "despawn_cube",
            Command::ApplyForce { .. } => "apply_force",
            Command::GetCubeState => "get_cube_state",
            Command::GetCubeList => "get_cube_list",
            Command::FreezeCube { .. } => "freeze_cube",
        }
    }

    /// Returns true if the server answers this command with a frame.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Command::GetCubeState | Command::GetCubeList)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let spawn = Command::SpawnCube {
            cube_name: "alpha".to_string(),
            position: [1.0, 2.0, 3.0],
            rotation: ZERO_ROTATION,
            is_base: true,
        };
        assert_eq!(
            serde_json::to_value(&spawn).unwrap(),
            json!({
                "type": "spawn_cube",
                "cube_name": "alpha",
                "position": [1.0, 2.0, 3.0],
                "rotation": [0.0, 0.0, 0.0],
                "is_base": true,
            })
        );

        assert_eq!(
            serde_json::to_value(&Command::GetCubeState).unwrap(),
            json!({ "type": "get_cube_state" })
        );

        let freeze = Command::FreezeCube {
            cube_name: "alpha_BASE".to_string(),
            freeze: false,
        };
        assert_eq!(
            serde_json::to_value(&freeze).unwrap(),
            json!({ "type": "freeze_cube", "cube_name": "alpha_BASE", "freeze": false })
        );
    }

    #[test]
    fn test_command_kind_matches_tag() {
        let commands = vec![
            Command::DespawnCube { cube_name: "x".into() },
            Command::ApplyForce { force: [0.0; 3] },
            Command::GetCubeState,
            Command::GetCubeList,
        ];
        for command in commands {
            let value = serde_json::to_value(&command).unwrap();
            assert_eq!(value["type"], command.kind());
        }
    }

    #[test]
    fn test_command_parses_server_side() {
        let raw = r#"{"type":"apply_force","force":[-20.0,0.5,20.0]}"#;
        let command: Command = serde_json::from_str(raw).unwrap();
        assert_eq!(command, Command::ApplyForce { force: [-20.0, 0.5, 20.0] });
        assert!(!command.expects_reply());
    }
}
