//! Construct Environment & Wire Layer
//!
//! This crate provides the pieces every Construct component shares:
//! - The clock/task abstraction (`ConstructContext`) so schedulers can run
//!   against the wall clock or a virtual one
//! - The delimiter-framed TCP transport (`FramedConnection`)
//! - The shared-secret handshake (`authenticate`)
//! - The command set of the cube server (`Command`)
//!
//! # Example
//!
//! ```ignore
//! use construct_env::{Command, ConnectionConfig};
//!
//! let config = ConnectionConfig::new("127.0.0.1:14000", "secret");
//! let mut conn = config.open().await?;   // connect + authenticate
//! conn.send(&Command::GetCubeList).await?;
//! let frame = conn.receive().await?;
//! ```

mod config;
mod context;
mod error;
mod handshake;
mod tokio_impl;
mod transport;
mod types;

pub use config::ConnectionConfig;
pub use context::ConstructContext;
pub use error::WireError;
pub use handshake::authenticate;
pub use tokio_impl::TokioContext;
pub use transport::{Frame, FramedConnection, DEFAULT_DELIMITER, DEFAULT_READ_TIMEOUT};
pub use types::{Command, Vec3, BASE_SUFFIX, ZERO_ROTATION};
