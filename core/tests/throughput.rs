//! Single-line throughput: a line at takt produces one car per takt.
//!
//! One shop, one line of 4 stations, JPH 60, no stops, no parts.
//! speed_factor 60 and BASE_PERIOD 1s mean one tick = one simulated
//! minute = one line takt.

use plantsim_core::{config::PlantConfig, engine::SimEngine, event::{MemorySink, SimEvent}};

fn config() -> PlantConfig {
    let mut config = PlantConfig::single_line(4, 60.0);
    // No random failures in this scenario.
    config.shops[0].lines[0].mtbf = 1e12;
    config
}

fn build(seed: u64) -> SimEngine<MemorySink> {
    SimEngine::build_test("throughput-test", seed, &config()).expect("build engine")
}

#[test]
fn one_car_per_minute_at_takt() {
    let mut engine = build(11);
    engine.run_ticks(60).unwrap(); // one simulated hour

    let created = engine.sink().count_of("car-created");
    assert_eq!(created, 60, "one car should be born per takt");

    // Line exits lag creation by the pipeline depth (4 stations).
    let produced = engine.produced("BODY-L1").unwrap();
    assert!(
        (55..=60).contains(&produced),
        "expected ~56 line exits after the warmup, got {produced}"
    );
}

#[test]
fn full_shift_oee_is_near_100_percent() {
    let mut engine = build(12);
    // 07:00 to 23:48 = 1008 simulated minutes.
    engine.run_ticks(1008).unwrap();

    let shift_end: Vec<&SimEvent> = engine.sink().of_type("oee-shift-end").collect();
    assert!(!shift_end.is_empty(), "shift end must emit final OEE");

    let line_oee = shift_end
        .iter()
        .find_map(|e| match e {
            SimEvent::OeeShiftEnd { data } if data.line.as_deref() == Some("L1") => Some(data),
            _ => None,
        })
        .expect("line OEE at shift end");

    assert_eq!(line_oee.production_time_min, 1008);
    assert!(
        line_oee.cars_production >= 1000,
        "expected near-continuous production, got {}",
        line_oee.cars_production
    );
    assert!(
        line_oee.oee >= 99.0 && line_oee.oee <= 100.0,
        "an unstopped line at takt runs at ~100% OEE, got {}",
        line_oee.oee
    );
    assert!((line_oee.jph - 60.0).abs() < 1.0, "final JPH ~60, got {}", line_oee.jph);
}

#[test]
fn station_dwell_is_at_least_station_takt() {
    let mut engine = build(13);
    engine.run_ticks(120).unwrap();

    let topo = engine.topology();
    for (_, item) in engine.items().iter() {
        for entry in &item.trace {
            if let Some(leave) = entry.leave {
                let takt = topo.stations[entry.station].takt_ms;
                assert!(
                    leave - entry.enter >= takt,
                    "item {} left {} after {}ms, below the {}ms takt",
                    item.id,
                    topo.stations[entry.station].id,
                    leave - entry.enter,
                    takt
                );
            }
        }
    }
}

#[test]
fn dynamic_oee_is_deduplicated() {
    let mut engine = build(14);
    engine.run_ticks(30).unwrap();

    // One dynamic emission per produced-count change, not per tick.
    let dynamic = engine.sink().count_of("oee-calculated");
    assert!(dynamic <= 31, "dynamic OEE must be deduplicated, got {dynamic}");
    assert!(dynamic >= 2, "dynamic OEE must be emitted as production advances");
}
