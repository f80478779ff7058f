//! Construct Simulation Harness
//!
//! This crate provides a controlled environment where the Construct
//! controller runs end to end without an external physics server.
//!
//! # Core Principle: Real Wire, Virtual Clock
//!
//! - **Network**: real loopback TCP to an in-process server speaking the
//!   delimiter-framed protocol, with fault injection
//! - **Time**: tick boundaries and retry pauses run on a virtual clock, so a
//!   5-second pulsing run costs only its network round trips
//! - **Randomness**: spawn positions and position noise derive from a seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          SimWorld                            │
//! │  ┌────────────────────┐          ┌────────────────────────┐  │
//! │  │ Construct<SimCtx>  │   TCP    │ SimServer              │  │
//! │  │  cube0 ──conn──────┼─────────►│  session ─┐            │  │
//! │  │  cube1 ──conn──────┼─────────►│  session ─┤            │  │
//! │  │  batch ops ──conn──┼─────────►│  session ─┼─► Oracle   │  │
//! │  └────────┬───────────┘          │  FaultController       │  │
//! │           │ sleep/now            └────────────────────────┘  │
//! │  ┌────────▼───────────┐                                      │
//! │  │ SimContext (clock) │                                      │
//! │  └────────────────────┘                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use construct_sim::{SimConfig, SimWorld};
//!
//! let world = SimWorld::start(SimConfig::default()).await?;
//! let mut construct = world.populated_construct();
//! construct.spawn_all().await;
//! construct.start_pulsing(100, Duration::from_secs(5)).await?;
//! ```

mod context;
mod network;
mod oracle;
pub mod runner;
pub mod scenarios;
mod server;
mod world;

pub use context::SimContext;
pub use network::{FaultController, FaultPlan};
pub use oracle::{Oracle, SimCube};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use server::{ServerStats, SimServer, SimServerConfig};
pub use world::{spawn_positions, SimConfig, SimWorld};
