//! Construct Simulator CLI
//!
//! Run the controller end to end against the in-process cube server, or run
//! the pulsing lifecycle against a real one.

use clap::Parser;
use construct_core::ClampRange;
use construct_env::{ConnectionConfig, DEFAULT_DELIMITER};
use construct_sim::scenarios::ScenarioId;
use construct_sim::{ScenarioResult, ScenarioRunner};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Construct controller simulation CLI
#[derive(Parser, Debug)]
#[command(name = "construct-sim")]
#[command(about = "Drive cube swarms against a simulated or real server", long_about = None)]
struct Args {
    /// Scenario to run (swarm_pulse, nuke, stubborn, slow_server, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Seed for spawn positions
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of cubes
    #[arg(short, long, default_value = "5")]
    cubes: usize,

    /// Pulses per second
    #[arg(short, long, default_value = "100")]
    rate: u32,

    /// Pulsing duration in seconds
    #[arg(short, long, default_value = "5")]
    duration: f64,

    /// Lower clamp bound for force components
    #[arg(long, default_value = "-20", allow_hyphen_values = true)]
    clamp_min: f64,

    /// Upper clamp bound for force components
    #[arg(long, default_value = "20", allow_hyphen_values = true)]
    clamp_max: f64,

    /// Real server (host:port) for swarm_pulse instead of the in-process one
    #[arg(long)]
    server: Option<String>,

    /// Shared secret for --server (falls back to CONSTRUCT_SECRET)
    #[arg(long)]
    secret: Option<String>,

    /// Frame delimiter for --server
    #[arg(long, default_value = DEFAULT_DELIMITER)]
    delimiter: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new(Level::DEBUG.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Construct Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: swarm_pulse, nuke, stubborn, slow_server, all");
            std::process::exit(1);
        })]
    };

    if !(args.duration.is_finite() && args.duration >= 0.0) {
        eprintln!("Error: --duration must be a non-negative number of seconds");
        std::process::exit(1);
    }

    let mut runner = ScenarioRunner::new(args.seed, args.cubes)
        .with_rate(args.rate)
        .with_duration(Duration::from_secs_f64(args.duration))
        .with_clamp(ClampRange::new(args.clamp_min, args.clamp_max));

    if let Some(server) = &args.server {
        let mut config = ConnectionConfig::default().with_delimiter(args.delimiter.clone());
        config.server_addr = server.clone();
        if let Some(secret) = &args.secret {
            config.auth_pass = secret.clone();
        }
        runner = runner.with_external_server(config);
    }

    // Run scenarios
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for scenario in &scenarios {
        let result = runner.run(*scenario).await;

        if !args.json {
            if result.passed {
                info!(
                    "✓ {} PASSED ({} ticks, {} pulses)",
                    scenario.name(),
                    result.total_ticks,
                    result.metrics.pulses
                );
            } else {
                error!(
                    "✗ {} FAILED: {}",
                    scenario.name(),
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        if !result.passed {
            failed_count += 1;
        }
        all_results.push(result);
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "pulses": r.metrics.pulses,
                    "pulse_failures": r.metrics.pulse_failures,
                    "list_requests": r.metrics.list_requests,
                    "destroy_attempts": r.metrics.destroy_attempts,
                    "cubes_left": r.final_cube_count,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
