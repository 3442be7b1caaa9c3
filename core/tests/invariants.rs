//! Universal invariants, checked after a long mixed run with random
//! stops, planned stops, defects and rework all active.

use plantsim_core::{
    config::{PlannedStopRule, PlantConfig},
    engine::SimEngine,
    event::{MemorySink, SimEvent},
    stops::StopStatus,
};
use std::collections::HashSet;

fn build(seed: u64) -> SimEngine<MemorySink> {
    let mut config = PlantConfig::two_shops(60.0, 8.0);
    config.planned_stops = vec![PlannedStopRule {
        reason: "LUNCH".into(),
        start: "12:00".into(),
        duration_min: 60,
        days_of_week: vec![],
        affects_shops: vec![],
    }];
    SimEngine::build_test("invariant-test", seed, &config).expect("build engine")
}

#[test]
fn universal_invariants_hold_after_a_long_run() {
    let mut engine = build(81);
    engine.run_ticks(700).unwrap(); // 07:00 -> 18:40, through lunch

    let topo = engine.topology();

    // 1. Stopped stations reference exactly one in-progress stop.
    for (idx, state) in engine.stations().iter().enumerate() {
        if state.is_stopped {
            let stop_id = state.stop_id.unwrap_or_else(|| {
                panic!("station {} stopped without a stop id", topo.stations[idx].id)
            });
            let stop = engine.stops().get(stop_id).expect("stop exists");
            assert_eq!(
                stop.status,
                StopStatus::InProgress,
                "station {} references a non-running stop",
                topo.stations[idx].id
            );
            assert!(state.stop_reason.is_some());
        } else {
            assert!(state.stop_id.is_none());
            assert!(state.stop_reason.is_none());
        }
    }

    // 2. Buffer counts within capacity, status derived from count.
    for (_, buffer) in engine.buffers().iter() {
        assert!(buffer.len() <= buffer.capacity, "buffer {} over capacity", buffer.id);
        let status = buffer.status();
        match buffer.len() {
            0 => assert_eq!(status, plantsim_core::buffers::BufferStatus::Empty),
            n if n == buffer.capacity => {
                assert_eq!(status, plantsim_core::buffers::BufferStatus::Full)
            }
            _ => assert_eq!(status, plantsim_core::buffers::BufferStatus::Available),
        }
    }

    // 3. No item occupies two places at once.
    let mut seen: HashSet<usize> = HashSet::new();
    for state in engine.stations() {
        if let Some(item) = state.occupied {
            assert!(seen.insert(item), "item held by two stations");
        }
    }
    for (_, buffer) in engine.buffers().iter() {
        for item in buffer.iter() {
            assert!(seen.insert(item), "item in a station and a buffer");
        }
    }

    // 4. Traces are monotonic and close before reopening.
    // 7. Dwell time is never below the station takt.
    for (_, item) in engine.items().iter() {
        let mut last_leave = i64::MIN;
        for entry in &item.trace {
            assert!(entry.enter >= last_leave, "trace reopened before closing");
            if let Some(leave) = entry.leave {
                assert!(leave >= entry.enter);
                assert!(
                    leave - entry.enter >= topo.stations[entry.station].takt_ms,
                    "item {} left {} below takt",
                    item.id,
                    topo.stations[entry.station].id
                );
                last_leave = leave;
            }
        }
    }

    // 6. Rework dwell is honored for every release.
    let mut entered: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    for event in &engine.sink().events {
        match event {
            SimEvent::ReworkIn { item_id, ts, .. } => {
                entered.insert(item_id.clone(), *ts);
            }
            SimEvent::ReworkOut { item_id, ts, .. } => {
                let t_in = entered[item_id.as_str()];
                assert!(*ts - t_in >= 3_600_000, "rework released {item_id} early");
            }
            _ => {}
        }
    }

    // Something actually happened in this run.
    assert!(engine.items().completed_total > 100);
    assert!(engine.stops().completed().count() > 0);
}

/// Every started stop either completes or is still referenced by a
/// station; no event is emitted twice for one transition.
#[test]
fn stop_events_pair_up() {
    let mut engine = build(82);
    engine.run_ticks(400).unwrap();

    let mut started: Vec<u64> = Vec::new();
    let mut ended: Vec<u64> = Vec::new();
    for event in &engine.sink().events {
        match event {
            SimEvent::StopStarted { stop, .. } => started.push(stop.id),
            SimEvent::StopEnded { stop, .. } => ended.push(stop.id),
            _ => {}
        }
    }

    // No duplicate transitions.
    let unique_started: HashSet<_> = started.iter().collect();
    let unique_ended: HashSet<_> = ended.iter().collect();
    assert_eq!(unique_started.len(), started.len(), "stop started twice");
    assert_eq!(unique_ended.len(), ended.len(), "stop ended twice");

    // Every ended stop was started; every completed stop that started
    // emitted its end.
    for id in &ended {
        assert!(started.contains(id), "stop {id} ended without starting");
    }
    for id in &started {
        let stop = engine.stops().get(*id).expect("stop exists");
        if stop.status == StopStatus::Completed {
            assert!(ended.contains(id), "completed stop {id} never emitted its end");
        }
    }
}
