//! Propagation stops: blocked and starved time is attributed to the
//! station that could not move, and ends when the flow clears.

use plantsim_core::{
    config::PlantConfig,
    engine::SimEngine,
    event::MemorySink,
    stops::{AffectedScope, StopKind, StopStatus},
    types::MINUTE_MS,
};

fn config(buffer_cap: usize) -> PlantConfig {
    let mut config = PlantConfig::two_lines(buffer_cap, 60.0);
    for line in &mut config.shops[0].lines {
        line.mtbf = 1e12;
    }
    config
}

fn build(buffer_cap: usize, seed: u64) -> SimEngine<MemorySink> {
    SimEngine::build_test("propagation-test", seed, &config(buffer_cap)).expect("build engine")
}

/// L1 -> [cap 2] -> L2; L2's first station fails for 10 minutes. The
/// buffer fills, L1's last station reports the blockage, and the record
/// closes within a tick of L2 resuming.
#[test]
fn buffer_full_stop_spans_the_blockage() {
    let mut engine = build(2, 21);
    let t0 = engine.clock.sim_time_ms; // 07:00

    engine
        .schedule_station_stop(
            "BODY-L2-S1",
            "EQUIPMENT_FAILURE",
            StopKind::Random,
            t0 + 10 * MINUTE_MS,
            10 * MINUTE_MS,
        )
        .unwrap();
    engine.run_ticks(30).unwrap(); // to 07:30

    let topo = engine.topology();
    let blocked_station = topo.station_index("BODY-L1-S3").unwrap();

    let flow_stop = engine
        .stops()
        .iter()
        .find(|s| s.kind == StopKind::Propagation && s.reason == "Buffer Full")
        .expect("L1's last station must report the full buffer");
    assert_eq!(
        flow_stop.scope,
        AffectedScope::SingleStation(blocked_station)
    );
    assert_eq!(flow_stop.status, StopStatus::Completed);

    // Fill delay: the failure hits at +10min, the 2-slot buffer fills
    // over the following ticks.
    assert!(
        flow_stop.start_time > t0 + 10 * MINUTE_MS && flow_stop.start_time <= t0 + 16 * MINUTE_MS,
        "flow stop started at unexpected time {}",
        flow_stop.start_time - t0
    );
    // The failure clears at +20min; the buffer drains one slot and the
    // next push succeeds within a tick.
    assert!(
        flow_stop.end_time >= t0 + 20 * MINUTE_MS && flow_stop.end_time <= t0 + 22 * MINUTE_MS,
        "flow stop ended at unexpected time {}",
        flow_stop.end_time - t0
    );

    // The blockage also backs up inside L1.
    assert!(
        engine
            .stops()
            .iter()
            .any(|s| s.kind == StopKind::Propagation && s.reason == "NEXT_FULL"),
        "upstream stations must report NEXT_FULL while the line is wedged"
    );

    // The forced failure itself completed with its scheduled duration.
    let forced = engine
        .stops()
        .iter()
        .find(|s| s.kind == StopKind::Random)
        .unwrap();
    assert_eq!(forced.status, StopStatus::Completed);
    assert_eq!(forced.duration_ms, 10 * MINUTE_MS);
}

/// A station that never received its first item must not raise
/// starvation records.
#[test]
fn no_propagation_before_first_car() {
    let mut engine = build(2, 22);
    engine.run_ticks(2).unwrap();

    assert!(
        engine
            .stops()
            .iter()
            .all(|s| s.kind != StopKind::Propagation),
        "virgin stations must not report starvation"
    );
}

/// Starvation on a running line: once L1 halts, L2 drains and its
/// stations report PREV_EMPTY / Buffer Empty.
#[test]
fn starvation_is_reported_after_flow_established() {
    let mut engine = build(2, 23);
    let t0 = engine.clock.sim_time_ms;

    // Take L1's first station down for a long window so the feed dries up.
    engine
        .schedule_station_stop(
            "BODY-L1-S1",
            "EQUIPMENT_FAILURE",
            StopKind::Random,
            t0 + 10 * MINUTE_MS,
            30 * MINUTE_MS,
        )
        .unwrap();
    engine.run_ticks(30).unwrap();

    assert!(
        engine
            .stops()
            .iter()
            .any(|s| s.reason == "PREV_EMPTY" || s.reason == "Buffer Empty"),
        "starved stations must report empty-feed stops"
    );
}
