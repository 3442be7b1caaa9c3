//! Stop generation and the MTTR/MTBF formulas.

use plantsim_core::{
    config::{PlannedStopRule, PlantConfig},
    engine::SimEngine,
    event::MemorySink,
    kpi,
    stops::{self, StopKind, StopStatus},
    types::{HOUR_MS, MINUTE_MS, SECOND_MS},
};

fn build(config: &PlantConfig, seed: u64) -> SimEngine<MemorySink> {
    SimEngine::build_test("stops-test", seed, config).expect("build engine")
}

/// MTBF 120 over a 1008-minute day yields 8 random stops, one per
/// equal-width segment, with clamped scaled durations.
#[test]
fn random_pool_matches_mtbf_and_mttr() {
    let config = PlantConfig::single_line(4, 60.0); // MTTR 6, MTBF 120
    let mut engine = build(&config, 61);
    engine.start(); // materializes the day's pools

    let randoms: Vec<_> = engine
        .stops()
        .iter()
        .filter(|s| s.kind == StopKind::Random)
        .collect();
    assert_eq!(randoms.len(), 8, "floor(1008 / 120) random stops per day");

    let t0 = engine.clock.sim_time_ms; // 07:00
    let segment = 1008 * MINUTE_MS / 8;
    let mut total = 0;
    for (i, stop) in randoms.iter().enumerate() {
        let duration = stop.end_time - stop.start_time;
        assert!(
            (30 * SECOND_MS..=2 * HOUR_MS).contains(&duration),
            "duration {duration}ms out of clamp range"
        );
        let offset = stop.start_time - t0;
        assert!(
            offset >= i as i64 * segment && offset < (i as i64 + 1) * segment,
            "stop {i} landed outside its segment: offset {offset}"
        );
        total += duration;
    }
    // Total approximates MTTR x n (6 x 8 = 48 min) within jitter/clamp.
    let total_min = total / MINUTE_MS;
    assert!(
        (25..=75).contains(&total_min),
        "total random downtime {total_min}min is far from the 48min target"
    );
}

/// A random failure cannot materialize on a station that never held a
/// car: it is pushed out by two hours instead.
#[test]
fn random_stop_reschedules_off_an_empty_station() {
    let mut config = PlantConfig::single_line(4, 60.0);
    config.shops[0].lines[0].mtbf = 1e12;
    let mut engine = build(&config, 62);
    let t0 = engine.clock.sim_time_ms;

    // S4 will not see its first car until tick 4.
    let id = engine
        .schedule_station_stop(
            "BODY-L1-S4",
            "EQUIPMENT_FAILURE",
            StopKind::Random,
            t0 + MINUTE_MS,
            5 * MINUTE_MS,
        )
        .unwrap();
    engine.run_ticks(2).unwrap();

    let stop = engine.stops().get(id).unwrap();
    assert_eq!(stop.status, StopStatus::Planned, "stop must not start on an empty station");
    assert_eq!(
        stop.start_time,
        t0 + MINUTE_MS + 2 * HOUR_MS,
        "start must shift by two simulated hours"
    );
}

/// Two forced failures on one station: MTTR is their mean duration,
/// MTBF the production time over the count.
#[test]
fn mttr_mtbf_formulas() {
    let mut config = PlantConfig::single_line(4, 60.0);
    config.shops[0].lines[0].mtbf = 1e12;
    let mut engine = build(&config, 63);
    let t0 = engine.clock.sim_time_ms;

    engine
        .schedule_station_stop(
            "BODY-L1-S2",
            "EQUIPMENT_FAILURE",
            StopKind::Random,
            t0 + 10 * MINUTE_MS,
            6 * MINUTE_MS,
        )
        .unwrap();
    engine
        .schedule_station_stop(
            "BODY-L1-S2",
            "EQUIPMENT_FAILURE",
            StopKind::Random,
            t0 + 30 * MINUTE_MS,
            4 * MINUTE_MS,
        )
        .unwrap();
    engine.run_ticks(60).unwrap(); // to 08:00, both completed

    let topo = engine.topology();
    let index = kpi::StopIndex::build(engine.stops());
    let station = topo.station_index("BODY-L1-S2").unwrap();
    let data = kpi::station_mttr_mtbf(topo, &index, station, engine.clock.sim_time_ms);
    assert_eq!(data.stop_count, 2);
    assert!((data.mttr_min - 5.0).abs() < 1e-9, "mean of 6 and 4 minutes");
    assert!((data.mtbf_min - 504.0).abs() < 1e-9, "1008 production minutes / 2");

    // Line aggregate: mean over the stations that contributed stops.
    // The blockage also leaves propagation records on neighbours, and
    // those count toward attribution exactly like failures.
    let line_idx = topo.line_index("BODY-L1").unwrap();
    let (line_data, station_data) =
        kpi::line_mttr_mtbf(topo, &index, line_idx, engine.clock.sim_time_ms);
    assert_eq!(station_data.len(), 4);
    let contributing: Vec<_> = station_data.iter().filter(|d| d.stop_count > 0).collect();
    assert!(!contributing.is_empty());
    let expected_mttr = kpi::round2(
        contributing.iter().map(|d| d.mttr_min).sum::<f64>() / contributing.len() as f64,
    );
    assert!((line_data.mttr_min - expected_mttr).abs() < 1e-9);
    assert_eq!(
        line_data.stop_count,
        station_data.iter().map(|d| d.stop_count).sum::<usize>()
    );
}

/// Planned stops respect their weekday mask. Day 0 (2024-01-01) is a
/// Monday: a Tuesday-only stop must not materialize.
#[test]
fn planned_stops_respect_weekdays() {
    let mut config = PlantConfig::single_line(4, 60.0);
    config.shops[0].lines[0].mtbf = 1e12;
    config.planned_stops = vec![PlannedStopRule {
        reason: "TEAM_MEETING".into(),
        start: "09:00".into(),
        duration_min: 30,
        days_of_week: vec![2], // Tuesday
        affects_shops: vec![],
    }];
    let mut engine = build(&config, 64);
    engine.start();

    assert!(
        engine.stops().iter().all(|s| s.kind != StopKind::Planned),
        "a Tuesday stop must not materialize on a Monday"
    );
    // Production time on Monday is the full shift.
    let topo = engine.topology();
    assert_eq!(topo.production_minutes(0, 1), 1008);
    assert_eq!(topo.production_minutes(0, 2), 978);
}

/// Classification: flow and LACK reasons never block, real reasons do.
#[test]
fn blocking_classification() {
    assert!(!stops::is_blocking_reason(stops::NEXT_FULL));
    assert!(!stops::is_blocking_reason(stops::PREV_EMPTY));
    assert!(!stops::is_blocking_reason(stops::BUFFER_EMPTY));
    assert!(!stops::is_blocking_reason(stops::BUFFER_FULL));
    assert!(!stops::is_blocking_reason(stops::PART_BUFFER_FULL));
    assert!(!stops::is_blocking_reason(stops::REWORK_FULL));
    assert!(!stops::is_blocking_reason("LACK-X"));
    assert!(stops::is_blocking_reason("LUNCH"));
    assert!(stops::is_blocking_reason("EQUIPMENT_FAILURE"));
}
