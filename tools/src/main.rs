//! sim-runner: headless plant simulation runner.
//!
//! Usage:
//!   sim-runner --config plant.json --seed 12345 --ticks 1000
//!   sim-runner --config plant.json --db run.db --realtime
//!   sim-runner --ticks 500 --json

use anyhow::Result;
use plantsim_core::{
    config::PlantConfig,
    engine::{SimEngine, ThrottleConfig},
    event::{EventSink, NullSink},
    store::SqliteEventSink,
    types::MINUTE_MS,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let ticks = parse_arg(&args, "--ticks", 1_000u64);
    let realtime = args.iter().any(|a| a == "--realtime");
    let json_summary = args.iter().any(|a| a == "--json");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str());
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str());

    let config = match config_path {
        Some(path) => PlantConfig::load(path)?,
        None => {
            log::info!("no --config given, using the built-in demo plant");
            PlantConfig::two_shops(60.0, 2.5)
        }
    };

    let session_id = plantsim_core::engine::generate_session_id();
    println!("plantsim sim-runner");
    println!("  session:  {session_id}");
    println!("  seed:     {seed}");
    println!("  ticks:    {ticks}");
    println!("  config:   {}", config_path.unwrap_or("<demo>"));
    println!("  db:       {}", db.unwrap_or("<none>"));
    println!();

    // Snapshots every 5 simulated minutes when persisting.
    let throttle = ThrottleConfig {
        plant_ms: 5 * MINUTE_MS,
        buffers_ms: 5 * MINUTE_MS,
    };

    match db {
        Some(path) => {
            let sink = SqliteEventSink::open(path, &session_id)?;
            sink.migrate()?;
            sink.insert_session(seed, env!("CARGO_PKG_VERSION"))?;
            let mut engine =
                SimEngine::with_throttle(session_id, seed, &config, sink, throttle)?;
            run(&mut engine, ticks, realtime)?;
            print_summary(&engine, json_summary)?;
        }
        None => {
            let mut engine =
                SimEngine::with_throttle(session_id, seed, &config, NullSink, throttle)?;
            run(&mut engine, ticks, realtime)?;
            print_summary(&engine, json_summary)?;
        }
    }

    Ok(())
}

fn run<S: EventSink>(engine: &mut SimEngine<S>, ticks: u64, realtime: bool) -> Result<()> {
    engine.start();
    let base_period = std::time::Duration::from_millis(engine.clock.base_period_ms as u64);
    for _ in 0..ticks {
        engine.tick()?;
        if realtime {
            std::thread::sleep(base_period);
        }
    }
    engine.pause();
    Ok(())
}

fn print_summary<S: EventSink>(engine: &SimEngine<S>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&engine.oee_report())?);
        return Ok(());
    }
    println!("simulated time: {}", engine.sim_time_of_day());
    println!("items created:  {}", engine.items().len());
    println!("completed cars: {}", engine.items().completed_total);
    println!("defective cars: {}", engine.items().defective_total);
    println!("stops recorded: {}", engine.stops().len());
    println!();
    println!("line OEE (dynamic):");
    for data in engine.oee_report() {
        println!(
            "  {:>12}  oee={:>6.2}%  jph={:>6.2}  produced={}",
            format!(
                "{}-{}",
                data.shop.as_deref().unwrap_or("?"),
                data.line.as_deref().unwrap_or("?")
            ),
            data.oee,
            data.jph,
            data.cars_production
        );
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
