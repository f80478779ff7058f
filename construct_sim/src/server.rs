//! In-process cube server speaking the delimiter-framed wire protocol.
//!
//! # Session
//!
//! ```text
//! Client                                        SimServer
//!   |-- <secret><delim> ---------------------------->|  mismatch: close
//!   |<--------------- {"status":"authenticated"}<delim>
//!   |-- {"type":"spawn_cube",...}<delim> ----------->|  binds cube to session
//!   |-- {"type":"apply_force",...}<delim> ---------->|  moves bound cube
//!   |-- {"type":"get_cube_state"}<delim> ----------->|
//!   |<------------------- {"position":[...],...}<delim>
//! ```
//!
//! Only `get_cube_state`, `get_cube_list` and the handshake are answered.
//! Incoming bytes are split on the delimiter with partial frames carried
//! over to the next read.

use crate::network::FaultController;
use crate::oracle::{Oracle, SimCube};

use construct_env::{Command, ConnectionConfig, DEFAULT_DELIMITER};
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

const READ_CHUNK: usize = 4096;

/// Configuration for the simulation server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimServerConfig {
    /// Shared secret expected as the first frame
    pub secret: String,

    /// Frame delimiter
    pub delimiter: String,

    /// Seconds integrated per `apply_force`
    pub physics_step: f64,

    /// Whether spawned cubes start frozen
    pub frozen_on_spawn: bool,

    /// Seed for reported-position noise
    pub seed: u64,
}

impl Default for SimServerConfig {
    fn default() -> Self {
        Self {
            secret: "construct".to_string(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            physics_step: 0.01,
            frozen_on_spawn: true,
            seed: 42,
        }
    }
}

/// Request counters, readable while the server runs.
#[derive(Debug, Default)]
struct ServerCounters {
    connections: AtomicU64,
    auth_failures: AtomicU64,
    spawns: AtomicU64,
    list_requests: AtomicU64,
    state_requests: AtomicU64,
    despawns_received: AtomicU64,
    despawns_honored: AtomicU64,
    forces: AtomicU64,
    freezes: AtomicU64,
    malformed: AtomicU64,
}

/// Snapshot of the server's request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections accepted
    pub connections: u64,

    /// Connections closed for a wrong secret
    pub auth_failures: u64,

    /// `spawn_cube` commands
    pub spawns: u64,

    /// `get_cube_list` commands
    pub list_requests: u64,

    /// `get_cube_state` commands
    pub state_requests: u64,

    /// `despawn_cube` commands received
    pub despawns_received: u64,

    /// `despawn_cube` commands that removed a cube
    pub despawns_honored: u64,

    /// `apply_force` commands
    pub forces: u64,

    /// `freeze_cube` commands
    pub freezes: u64,

    /// Frames that did not parse as a command
    pub malformed: u64,
}

impl ServerCounters {
    fn snapshot(&self) -> ServerStats {
        let read = |c: &AtomicU64| c.load(Ordering::SeqCst);
        ServerStats {
            connections: read(&self.connections),
            auth_failures: read(&self.auth_failures),
            spawns: read(&self.spawns),
            list_requests: read(&self.list_requests),
            state_requests: read(&self.state_requests),
            despawns_received: read(&self.despawns_received),
            despawns_honored: read(&self.despawns_honored),
            forces: read(&self.forces),
            freezes: read(&self.freezes),
            malformed: read(&self.malformed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// State shared by the accept loop and every session.
struct ServerState {
    config: SimServerConfig,
    oracle: Mutex<Oracle>,
    faults: FaultController,
    counters: ServerCounters,
    sessions: Mutex<Vec<AbortHandle>>,
}

impl ServerState {
    fn with_oracle<T>(&self, f: impl FnOnce(&mut Oracle) -> T) -> T {
        let mut oracle = self.oracle.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut oracle)
    }
}

/// A running simulation server. Dropping it stops every task it started.
pub struct SimServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl SimServer {
    /// Starts a server on an ephemeral loopback port.
    pub async fn start(config: SimServerConfig) -> io::Result<Self> {
        Self::bind("127.0.0.1:0", config).await
    }

    /// Starts a server on `addr`.
    pub async fn bind(addr: &str, config: SimServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(ServerState {
            oracle: Mutex::new(Oracle::new(
                config.seed,
                config.physics_step,
                config.frozen_on_spawn,
            )),
            config,
            faults: FaultController::new(),
            counters: ServerCounters::default(),
            sessions: Mutex::new(Vec::new()),
        });

        let accept_task = tokio::spawn(accept_loop(listener, state.clone()));
        info!(%addr, "simulation server listening");

        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    /// Address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client parameters matching this server's secret and delimiter.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr.to_string(), self.state.config.secret.clone())
            .with_delimiter(self.state.config.delimiter.clone())
    }

    /// Fault injection handle.
    pub fn faults(&self) -> &FaultController {
        &self.state.faults
    }

    /// Current request counters.
    pub fn stats(&self) -> ServerStats {
        self.state.counters.snapshot()
    }

    /// Canonical names of every cube on the server.
    pub fn cube_names(&self) -> Vec<String> {
        self.state.with_oracle(|oracle| oracle.names())
    }

    /// Ground truth for one cube.
    pub fn cube(&self, name: &str) -> Option<SimCube> {
        self.state.with_oracle(|oracle| oracle.get(name).cloned())
    }

    /// Largest absolute force component received so far.
    pub fn max_force_component(&self) -> f64 {
        self.state.with_oracle(|oracle| oracle.max_force_component())
    }

    /// Seeds a cube directly, bypassing the wire.
    pub fn insert_cube(&self, name: &str, position: [f64; 3], is_base: bool) -> String {
        self.state.with_oracle(|oracle| oracle.spawn(name, position, is_base))
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let sessions = self
            .state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for session in sessions.iter() {
            session.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        bump(&state.counters.connections);

        let id = Uuid::new_v4();
        let span = tracing::debug_span!("session", %id, %peer);
        let handle = tokio::spawn(serve_session(stream, state.clone()).instrument(span));

        let mut sessions = state.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|s| !s.is_finished());
        sessions.push(handle.abort_handle());
    }
}

/// Per-connection protocol state.
struct Session {
    stream: TcpStream,
    buffer: Vec<u8>,
    authenticated: bool,
    bound_cube: Option<String>,
}

async fn serve_session(stream: TcpStream, state: Arc<ServerState>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }
    let mut session = Session {
        stream,
        buffer: Vec::new(),
        authenticated: false,
        bound_cube: None,
    };
    let delimiter = state.config.delimiter.as_bytes().to_vec();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match session.stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            }
        };
        session.buffer.extend_from_slice(&chunk[..n]);

        while let Some(frame) = split_frame(&mut session.buffer, &delimiter) {
            let keep_open = match handle_frame(&mut session, &state, &frame).await {
                Ok(keep_open) => keep_open,
                Err(e) => {
                    debug!(error = %e, "write failed");
                    false
                }
            };
            if !keep_open {
                debug!("session closed by server");
                return;
            }
        }
    }
    debug!(cube = ?session.bound_cube, "session ended");
}

/// Removes and returns the first complete frame, leaving the rest buffered.
fn split_frame(buffer: &mut Vec<u8>, delimiter: &[u8]) -> Option<Vec<u8>> {
    let at = find(buffer, delimiter)?;
    let frame = buffer[..at].to_vec();
    buffer.drain(..at + delimiter.len());
    Some(frame)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Handles one frame. Returns false when the session must close.
async fn handle_frame(
    session: &mut Session,
    state: &ServerState,
    frame: &[u8],
) -> io::Result<bool> {
    let text = String::from_utf8_lossy(frame);
    let text = text.trim();

    if !session.authenticated {
        if text != state.config.secret {
            bump(&state.counters.auth_failures);
            warn!("authentication failed");
            return Ok(false);
        }
        session.authenticated = true;
        reply(session, state, &json!({ "status": "authenticated" }), false).await?;
        return Ok(true);
    }

    let command: Command = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            bump(&state.counters.malformed);
            warn!(error = %e, "malformed command");
            return Ok(true);
        }
    };
    debug!(kind = command.kind(), replies = command.expects_reply(), "command");

    match command {
        Command::SpawnCube {
            cube_name,
            position,
            is_base,
            ..
        } => {
            bump(&state.counters.spawns);
            let canonical = state.with_oracle(|oracle| oracle.spawn(&cube_name, position, is_base));
            debug!(cube = %canonical, "spawned");
            session.bound_cube = Some(canonical);
        }
        Command::DespawnCube { cube_name } => {
            bump(&state.counters.despawns_received);
            if state.faults.admit_despawn()
                && state.with_oracle(|oracle| oracle.despawn(&cube_name))
            {
                bump(&state.counters.despawns_honored);
                debug!(cube = %cube_name, "despawned");
            }
        }
        Command::ApplyForce { force } => {
            bump(&state.counters.forces);
            if let Some(name) = &session.bound_cube {
                state.with_oracle(|oracle| oracle.apply_force(name, force));
            }
        }
        Command::FreezeCube { cube_name, freeze } => {
            bump(&state.counters.freezes);
            state.with_oracle(|oracle| oracle.set_frozen(&cube_name, freeze));
        }
        Command::GetCubeList => {
            bump(&state.counters.list_requests);
            state.faults.on_list_request();
            let names = state.with_oracle(|oracle| oracle.names());
            reply(session, state, &json!({ "cubes": names }), false).await?;
        }
        Command::GetCubeState => {
            bump(&state.counters.state_requests);
            let body = cube_state(session, state);
            let truncate = state.faults.truncate_state_replies();
            reply(session, state, &body, truncate).await?;
        }
    }
    Ok(true)
}

fn cube_state(session: &Session, state: &ServerState) -> serde_json::Value {
    let Some(name) = &session.bound_cube else {
        return json!({ "error": "no cube bound to this connection" });
    };

    let noise = state.faults.plan().position_noise_std;
    state.with_oracle(|oracle| {
        oracle.set_position_noise(noise);
        match (oracle.observe(name), oracle.get(name)) {
            (Some(position), Some(cube)) => json!({
                "name": name,
                "position": position,
                "velocity": [cube.velocity.x, cube.velocity.y, cube.velocity.z],
                "frozen": cube.frozen,
            }),
            _ => json!({ "error": format!("cube {} does not exist", name) }),
        }
    })
}

/// Writes a JSON reply; a truncated reply carries half the payload and no delimiter.
async fn reply(
    session: &mut Session,
    state: &ServerState,
    body: &serde_json::Value,
    truncate: bool,
) -> io::Result<()> {
    let mut bytes =
        serde_json::to_vec(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if truncate {
        bytes.truncate(bytes.len() / 2);
    } else {
        bytes.extend_from_slice(state.config.delimiter.as_bytes());
    }
    session.stream.write_all(&bytes).await?;
    session.stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frame_carries_partial_over() {
        let mut buffer = b"one|DONE|two|DO".to_vec();
        let delim = b"|DONE|";

        assert_eq!(split_frame(&mut buffer, delim), Some(b"one".to_vec()));
        assert_eq!(split_frame(&mut buffer, delim), None);
        assert_eq!(buffer, b"two|DO".to_vec());

        buffer.extend_from_slice(b"NE|");
        assert_eq!(split_frame(&mut buffer, delim), Some(b"two".to_vec()));
        assert!(buffer.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_frames_survive_any_chunking(
            frames in proptest::collection::vec("[a-z0-9{}\":,]{0,40}", 1..8),
            cut in 1usize..64,
        ) {
            let delim = DEFAULT_DELIMITER.as_bytes();
            let mut wire = Vec::new();
            for frame in &frames {
                wire.extend_from_slice(frame.as_bytes());
                wire.extend_from_slice(delim);
            }

            let mut buffer = Vec::new();
            let mut out = Vec::new();
            for chunk in wire.chunks(cut) {
                buffer.extend_from_slice(chunk);
                while let Some(frame) = split_frame(&mut buffer, delim) {
                    out.push(String::from_utf8(frame).unwrap());
                }
            }

            proptest::prop_assert_eq!(out, frames);
            proptest::prop_assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_find_edge_cases() {
        assert_eq!(find(b"abc", b""), None);
        assert_eq!(find(b"ab", b"abc"), None);
        assert_eq!(find(b"xxabc", b"abc"), Some(2));
    }

    #[tokio::test]
    async fn test_server_rejects_wrong_secret() {
        let server = SimServer::start(SimServerConfig::default()).await.unwrap();

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        let hello = format!("wrong{}", DEFAULT_DELIMITER);
        stream.write_all(hello.as_bytes()).await.unwrap();

        // Server closes without replying
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        assert_eq!(server.stats().auth_failures, 1);
    }

    #[tokio::test]
    async fn test_server_answers_list_in_one_write() {
        let server = SimServer::start(SimServerConfig::default()).await.unwrap();
        server.insert_cube("a", [0.0; 3], true);

        let mut conn = server.connection_config().open().await.unwrap();
        conn.send(&Command::GetCubeList).await.unwrap();
        let frame = conn.receive().await.unwrap();

        assert!(frame.is_terminated());
        let reply: serde_json::Value = frame.parse().unwrap();
        assert_eq!(reply["cubes"], json!(["a_BASE"]));
        assert_eq!(server.stats().list_requests, 1);
    }
}
