//! Fixed-rate pulsing against the simulation server on a virtual clock.

use construct_core::{ClampRange, CubeStatus, DecisionFn, LinearPolicy, Scoreboard};
use construct_env::{ConstructContext, Vec3};
use construct_sim::{SimConfig, SimWorld};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_five_cubes_at_100_per_second_for_5_seconds() {
    let world = SimWorld::start(SimConfig {
        num_cubes: 5,
        clamp: ClampRange::new(-20.0, 20.0),
        ..Default::default()
    })
    .await
    .unwrap();

    let scoreboard = Scoreboard::new();
    let mut construct = world.construct().with_scoreboard(scoreboard.clone());
    // Far from the origin so the raw action always exceeds the clamp
    let policy: Arc<dyn DecisionFn> = Arc::new(LinearPolicy::seek([0.0; 3], 10.0));
    for i in 0..5 {
        let offset = 50.0 + i as f64;
        construct.add_cube(format!("cube{}", i), [offset, -offset, offset], policy.clone());
    }

    assert!(construct.spawn_all().await.is_complete());
    let summary = construct
        .start_pulsing(100, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(summary.ticks, 500);
    assert_eq!(summary.pulses, 2500);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.lost, 0);
    assert_eq!(world.context.now(), Duration::from_secs(5));

    for (name, sample) in scoreboard.snapshot() {
        assert_eq!(sample.pulses, 500, "{} missed ticks", name);
        assert_eq!(sample.failures, 0);
    }

    // Every force was clamped before it left the client
    let stats = world.server.stats();
    assert_eq!(stats.forces, 2500);
    assert_eq!(stats.state_requests, 2500);
    assert!(world.server.max_force_component() <= 20.0);
    for cube in construct.cubes() {
        let truth = world.server.cube(cube.name()).unwrap();
        assert_eq!(truth.last_force.amax(), 20.0);
    }
}

#[tokio::test]
async fn test_positions_come_only_from_refresh() {
    let world = SimWorld::start(SimConfig {
        num_cubes: 3,
        ..Default::default()
    })
    .await
    .unwrap();
    let mut construct = world.populated_construct();
    construct.spawn_all().await;
    for cube in construct.cubes_mut() {
        cube.refresh_position().await.unwrap();
    }
    let spawned: Vec<Vec3> = construct.cubes().iter().map(|c| c.position()).collect();
    construct.unfreeze_all().await.unwrap();

    construct
        .start_pulsing(50, Duration::from_secs(1))
        .await
        .unwrap();

    // A pulse ends on a read, so one more read must agree with it
    for cube in construct.cubes_mut() {
        assert_eq!(cube.status(), CubeStatus::Active);
        cube.refresh_position().await.unwrap();
        let truth = world.server.cube(cube.name()).unwrap().position;
        assert_eq!(cube.position(), [truth.x, truth.y, truth.z]);
    }

    let moved = construct
        .cubes()
        .iter()
        .zip(&spawned)
        .any(|(cube, start)| cube.position() != *start);
    assert!(moved);
}

#[tokio::test]
async fn test_every_pulse_of_a_tick_finishes_before_the_next() {
    let world = SimWorld::start(SimConfig::default()).await.unwrap();
    let mut construct = world.construct();

    // Each decision records the virtual time it ran at
    let seen: Arc<Mutex<Vec<Duration>>> = Arc::default();
    for i in 0..4 {
        let clock = world.context.clone();
        let seen = seen.clone();
        let decision = move |p: Vec3| {
            seen.lock().unwrap().push(clock.now());
            p.to_vec()
        };
        construct.add_cube(format!("cube{}", i), [i as f64; 3], Arc::new(decision));
    }
    construct.spawn_all().await;

    let summary = construct
        .start_pulsing(50, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(summary.ticks, 50);

    let mut per_tick: BTreeMap<Duration, usize> = BTreeMap::new();
    for at in seen.lock().unwrap().iter() {
        *per_tick.entry(*at).or_default() += 1;
    }

    // One boundary per tick, every cube decided exactly once at each
    assert_eq!(per_tick.len(), 50);
    assert!(per_tick.values().all(|&count| count == 4));
    let first = *per_tick.keys().next().unwrap();
    assert_eq!(first, Duration::from_millis(20));
}
