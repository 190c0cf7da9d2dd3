//! Basic demonstration of the Orbit simulation core.
//!
//! Run with: cargo run --example basic_demo
//! More output: RUST_LOG=orbit_sim=debug cargo run --example basic_demo

use orbit_sim::{
    BodyCategory, BodySpec, EmitterConfig, ReboundAndCollision, SimConfig, SimError, Simulation,
    SpawnConfig,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> orbit_sim::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Orbit - Simulation Demo ===\n");

    let mut config = SimConfig::with_world(2000.0, 2000.0);
    config.max_dynamic_bodies = 600;
    let sim = Simulation::builder(config)
        .rules(Arc::new(ReboundAndCollision))
        .build()?;

    // A sun in the middle and a ring of asteroids drifting around it
    sim.add_body(BodySpec::gravity(1000.0, 1000.0, 120.0).with_asset("sun"))?;
    for i in 0..200 {
        let angle = i as f64 * 1.8_f64.to_radians();
        let x = 1000.0 + angle.cos() * 700.0;
        let y = 1000.0 + angle.sin() * 700.0;
        let spec = BodySpec::dynamic(x, y, 12.0)
            .with_asset("asteroid")
            .with_speed(-angle.sin() * 80.0, angle.cos() * 80.0);
        sim.add_body(spec)?;
    }

    // A player with a gun and an exhaust trail
    let ship = sim
        .add_body(BodySpec::player(200.0, 200.0, 24.0).with_asset("ship"))?
        .ok_or_else(|| SimError::InvalidConfig("player was not created".into()))?;
    let bullet = SpawnConfig {
        forward_offset: 20.0,
        ..SpawnConfig::projectile("bullet", 600.0, 4.0, 1.5)
    };
    sim.add_weapon(ship, EmitterConfig::magazine(bullet, 8.0, 30, 2.0))?;
    let exhaust = SpawnConfig {
        category: BodyCategory::Decorator,
        asset_id: "smoke".into(),
        size: 6.0,
        forward_offset: -16.0,
        max_lifetime: 0.6,
        random_size: true,
        ..Default::default()
    };
    sim.equip_trail(ship, EmitterConfig::continuous(exhaust, 20.0))?;

    sim.activate();
    println!("Initial: {:?}\n", sim.counters());

    sim.set_angle(ship, 45.0)?;
    sim.thrust_on(ship)?;
    'run: for second in 1..=5 {
        for _ in 0..10 {
            // The ship may have hit an asteroid
            if let Err(err) = sim.fire(ship) {
                println!("ship lost: {err}");
                break 'run;
            }
            thread::sleep(Duration::from_millis(100));
        }
        if second == 3 && sim.thrust_off(ship).and_then(|_| sim.rotate_right(ship)).is_err() {
            break;
        }
        match sim.player_status(ship) {
            Ok(status) => println!("t={}s counters={:?} ammo={:?}", second, sim.counters(), status.ammo),
            Err(_) => break,
        }
    }

    println!("\n=== Statistics ===\n");
    println!("{}", serde_json::to_string_pretty(&sim.statistics())?);
    println!("pool: {:?}", sim.pool_stats());

    let report = sim.shutdown();
    println!("\nShutdown: {} batches stopped, {} forced", report.stopped, report.forced);
    Ok(())
}
