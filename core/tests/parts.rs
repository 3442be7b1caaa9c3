//! Parts matching at creation time, LACK lifecycle, and the
//! end-to-end part-line flow.

use plantsim_core::{
    config::PlantConfig,
    engine::SimEngine,
    event::{MemorySink, SimEvent},
    stops::{StopKind, StopStatus},
};

fn quiet(mut config: PlantConfig) -> PlantConfig {
    for shop in &mut config.shops {
        for line in &mut shop.lines {
            line.mtbf = 1e12;
        }
    }
    config
}

/// CarLine requires X and Y at its first station; the buffers hold
/// [P19,P20] and [P20,P35]. P20 is the only model present everywhere.
#[test]
fn first_common_model_wins_and_buffers_decrement() {
    let mut config = quiet(PlantConfig::parts_plant(60.0));
    // Only the car line creates; parts are loaded by hand.
    config.start_stations = vec!["TRIM-C1-S1".into()];
    let mut engine = SimEngine::build_test("parts-match", 31, &config).unwrap();

    engine.load_part("TRIM-PARTS-X", "P19").unwrap();
    engine.load_part("TRIM-PARTS-X", "P20").unwrap();
    engine.load_part("TRIM-PARTS-Y", "P20").unwrap();
    engine.load_part("TRIM-PARTS-Y", "P35").unwrap();

    engine.run_ticks(1).unwrap();

    let created: Vec<&SimEvent> = engine.sink().of_type("car-created").collect();
    assert_eq!(created.len(), 1);
    match created[0] {
        SimEvent::CarCreated { model, .. } => assert_eq!(model, "P20"),
        other => panic!("unexpected event {other:?}"),
    }

    let topo = engine.topology();
    let x = topo.buffer_index("TRIM-PARTS-X").unwrap();
    let y = topo.buffer_index("TRIM-PARTS-Y").unwrap();
    assert_eq!(engine.buffers().get(x).len(), 1);
    assert_eq!(engine.buffers().get(y).len(), 1);
    assert!(engine.buffers().get(x).contains_model(engine.items(), "P19"));
    assert!(engine.buffers().get(y).contains_model(engine.items(), "P35"));

    assert_eq!(engine.sink().count_of("part-consumed"), 2);
    assert!(
        engine.stops().iter().all(|s| s.kind != StopKind::Micro),
        "a successful match must not raise LACK stops"
    );
}

/// Same as above with the Y buffer empty: no car, a LACK-Y stop, and
/// recovery on the tick after a matching part arrives.
#[test]
fn lack_stop_raised_and_cleared() {
    let mut config = quiet(PlantConfig::parts_plant(60.0));
    config.start_stations = vec!["TRIM-C1-S1".into()];
    let mut engine = SimEngine::build_test("parts-lack", 32, &config).unwrap();

    engine.load_part("TRIM-PARTS-X", "P19").unwrap();
    engine.load_part("TRIM-PARTS-X", "P20").unwrap();

    engine.run_ticks(1).unwrap();
    assert_eq!(engine.sink().count_of("car-created"), 0);
    let state = engine.station_state("TRIM-C1-S1").unwrap();
    assert!(state.is_stopped);
    assert_eq!(state.stop_reason.as_deref(), Some("LACK-Y"));
    assert!(engine.sink().count_of("part-shortage") >= 1);

    engine.load_part("TRIM-PARTS-Y", "P20").unwrap();
    engine.run_ticks(1).unwrap();

    let created: Vec<&SimEvent> = engine.sink().of_type("car-created").collect();
    assert_eq!(created.len(), 1, "car must be created once the part arrives");
    match created[0] {
        SimEvent::CarCreated { model, .. } => assert_eq!(model, "P20"),
        other => panic!("unexpected event {other:?}"),
    }
    let lack = engine
        .stops()
        .iter()
        .find(|s| s.reason == "LACK-Y")
        .expect("LACK-Y stop recorded");
    assert_eq!(lack.status, StopStatus::Completed);
    let state = engine.station_state("TRIM-C1-S1").unwrap();
    assert!(!state.is_stopped);
}

/// With the supply lines producing, the car line consumes continuously:
/// two parts per car, no permanent shortages.
#[test]
fn supply_lines_feed_the_car_line() {
    let config = quiet(PlantConfig::parts_plant(60.0));
    let mut engine = SimEngine::build_test("parts-flow", 33, &config).unwrap();
    engine.run_ticks(120).unwrap();

    let cars = engine.sink().count_of("car-created");
    let consumed = engine.sink().count_of("part-consumed");
    assert!(cars > 50, "car line should run continuously, got {cars}");
    assert_eq!(consumed, 2 * cars, "every car consumes one X and one Y");

    // Early LACK stops (before the first parts arrive) must be closed.
    assert!(engine
        .stops()
        .iter()
        .filter(|s| s.kind == StopKind::Micro)
        .all(|s| s.status == StopStatus::Completed));
}

/// createWith: a part line mirrors a car-line station, one part per
/// exit, carrying the exiting car's model; the downstream shop consumes
/// the part for the matching car.
#[test]
fn create_with_synchronizes_part_births() {
    let mut config = quiet(PlantConfig::two_shops(60.0, 0.0));
    config.shops.push(plantsim_core::config::ShopConfig {
        name: "SUPPLY".into(),
        lines: vec![plantsim_core::config::LineConfig {
            name: "SYNC".into(),
            stations: vec!["P1".into(), "P2".into()],
            takt: plantsim_core::config::TaktConfig {
                jph: 60.0,
                shift_start: "07:00".into(),
                shift_end: "23:48".into(),
            },
            mttr: 6.0,
            mtbf: 1e12,
            routes: vec![],
            buffers: vec![],
            part_type: Some("Z".into()),
            required_parts: vec![],
            part_consumption_station: None,
            create_with: Some(plantsim_core::config::CreateWithConfig {
                shop: "BODY".into(),
                line: "L1".into(),
                station: "S2".into(),
            }),
        }],
        buffer_capacity: 10,
        rework_buffer: 5,
    });
    config.shops[1].lines[0].required_parts = vec!["Z".into()];
    config.shops[1].lines[0].part_consumption_station = Some("S1".into());
    config.start_stations.push("SUPPLY-SYNC-P1".into());

    let mut engine = SimEngine::build_test("create-with", 34, &config).unwrap();
    engine.run_ticks(100).unwrap();

    let parts_born = engine.sink().count_of("part-created");
    let s2_exits = engine
        .sink()
        .of_type("car-moved")
        .filter(|e| match e {
            SimEvent::CarMoved { from, .. } => from.line == "L1" && from.station == "S2",
            _ => false,
        })
        .count();
    assert!(parts_born > 0, "createWith line must produce");
    assert!(
        parts_born <= s2_exits && parts_born + 2 >= s2_exits,
        "one part per recorded exit: {parts_born} parts vs {s2_exits} exits"
    );

    // Every part carries a model that matches a produced car model.
    for (_, item) in engine.items().iter() {
        if item.is_part {
            assert!(["P19", "P20", "P35"].contains(&item.model.as_str()));
        }
    }

    // Downstream consumption happened with matching models.
    assert!(engine.sink().count_of("part-consumed") > 0);
    assert!(engine.produced("ASSEMBLY-A1").unwrap() > 0);
}
