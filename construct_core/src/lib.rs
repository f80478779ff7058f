//! Construct Core - controller for remotely simulated cubes
//!
//! This library drives a set of cubes living on a remote physics server:
//! 1. **Cube handles**: spawn, despawn and the decide/clamp/apply/refresh pulse
//! 2. **Batch orchestration**: list-then-act passes with bounded retries
//! 3. **Pulsing**: a fixed-rate loop with a per-tick barrier across all cubes

pub mod clamp;
pub mod construct;
pub mod cube;
pub mod decision;
pub mod error;
pub mod pulsing;
pub mod scoreboard;

// Re-export key types for convenience
pub use clamp::ClampRange;
pub use construct::{BatchOutcome, BatchReport, Construct, RetryPolicy, Termination};
pub use cube::{Cube, CubeStatus};
pub use decision::{DecisionFn, LinearPolicy};
pub use error::{ConstructError, CubeError};
pub use pulsing::PulseSummary;
pub use scoreboard::{CubeSample, Scoreboard};
