//! Plant configuration - the frozen input describing the plant.
//!
//! The config is plain data: shops, lines, stations, routes, shift
//! windows, planned-stop rules and tuning knobs. Validation and
//! cross-reference resolution happen in topology.rs; a config that does
//! not resolve is a fatal error and the engine refuses to start.

use crate::types::{SimTimeMs, MINUTE_MS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaktConfig {
    /// Jobs per hour - target throughput of the line.
    pub jph: f64,
    /// Shift window, "HH:MM" local simulated time.
    #[serde(rename = "shiftStart")]
    pub shift_start: String,
    #[serde(rename = "shiftEnd")]
    pub shift_end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub shop: String,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWithConfig {
    pub shop: String,
    pub line: String,
    pub station: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    pub name: String,
    /// Station names, first to last. Ids become "{shop}-{line}-{station}".
    pub stations: Vec<String>,
    pub takt: TaktConfig,
    /// Mean time to repair, minutes. Drives random-stop durations.
    #[serde(rename = "MTTR")]
    pub mttr: f64,
    /// Mean time between failures, minutes. Drives random-stop counts.
    #[serde(rename = "MTBF")]
    pub mtbf: f64,
    /// Outgoing routes. Parallel to `buffers` (declared capacities).
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub buffers: Vec<usize>,
    /// Set iff this line produces parts rather than cars.
    #[serde(rename = "partType", default)]
    pub part_type: Option<String>,
    /// Part types this line consumes.
    #[serde(rename = "requiredParts", default)]
    pub required_parts: Vec<String>,
    /// Station (by name) at which required parts are consumed.
    #[serde(rename = "partConsumptionStation", default)]
    pub part_consumption_station: Option<String>,
    /// Synchronize creation with exits of another line's station.
    #[serde(rename = "createWith", default)]
    pub create_with: Option<CreateWithConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopConfig {
    pub name: String,
    pub lines: Vec<LineConfig>,
    /// Default capacity for outgoing buffers without a declared one.
    #[serde(rename = "bufferCapacity")]
    pub buffer_capacity: usize,
    /// Capacity of this shop's rework buffer.
    #[serde(rename = "reworkBuffer")]
    pub rework_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStopRule {
    pub reason: String,
    /// "HH:MM" start within the day.
    pub start: String,
    #[serde(rename = "durationMin")]
    pub duration_min: i64,
    /// ISO weekday numbers (Mon=1 .. Sun=7). Empty = every day.
    #[serde(rename = "daysOfWeek", default)]
    pub days_of_week: Vec<u8>,
    /// Shop names this stop applies to. Empty = all shops.
    #[serde(rename = "affectsShops", default)]
    pub affects_shops: Vec<String>,
}

fn default_takt_min_fraction() -> f64 {
    0.70
}
fn default_takt_max_fraction() -> f64 {
    0.999
}
fn default_mix_items_per_line() -> usize {
    10
}
fn default_rework_time_ms() -> SimTimeMs {
    60 * MINUTE_MS
}
fn default_speed_factor() -> i64 {
    60
}
fn default_start_date() -> String {
    "2024-01-01".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantConfig {
    pub shops: Vec<ShopConfig>,
    #[serde(rename = "plannedStops", default)]
    pub planned_stops: Vec<PlannedStopRule>,
    /// Station ids ("{shop}-{line}-{station}") where items are created.
    #[serde(rename = "stationstartProduction")]
    pub start_stations: Vec<String>,
    /// Vehicle models in planned-mix order.
    pub models: Vec<String>,
    /// Paint colors drawn for new cars.
    pub colors: Vec<String>,
    /// Defects per hundred units; per-car defect probability is DPHU/100.
    #[serde(rename = "DPHU")]
    pub dphu: f64,
    /// Minimum dwell in a rework buffer before release, milliseconds.
    #[serde(rename = "Rework_Time", default = "default_rework_time_ms")]
    pub rework_time_ms: SimTimeMs,
    /// Simulated milliseconds per wall-clock base period.
    #[serde(rename = "typeSpeedFactor", default = "default_speed_factor")]
    pub speed_factor: i64,
    #[serde(rename = "stationTaktMinFraction", default = "default_takt_min_fraction")]
    pub station_takt_min_fraction: f64,
    #[serde(rename = "stationTaktMaxFraction", default = "default_takt_max_fraction")]
    pub station_takt_max_fraction: f64,
    /// Planned-mix block size is `start car lines x mix_items_per_line`.
    #[serde(rename = "MIX_ITEMS_PER_LINE", default = "default_mix_items_per_line")]
    pub mix_items_per_line: usize,
    /// Simulated calendar day 0, "YYYY-MM-DD".
    #[serde(rename = "startDate", default = "default_start_date")]
    pub start_date: String,
}

impl PlantConfig {
    /// Load a plant config from a JSON file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PlantConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    // ── Test plants ────────────────────────────────────────────────────
    // Small hand-built plants used across the integration tests.

    /// One shop, one line of `n_stations` stations, no parts, no stops.
    pub fn single_line(n_stations: usize, jph: f64) -> Self {
        Self {
            shops: vec![ShopConfig {
                name: "BODY".into(),
                lines: vec![LineConfig {
                    name: "L1".into(),
                    stations: (1..=n_stations).map(|i| format!("S{i}")).collect(),
                    takt: TaktConfig {
                        jph,
                        shift_start: "07:00".into(),
                        shift_end: "23:48".into(),
                    },
                    mttr: 6.0,
                    mtbf: 120.0,
                    routes: vec![],
                    buffers: vec![],
                    part_type: None,
                    required_parts: vec![],
                    part_consumption_station: None,
                    create_with: None,
                }],
                buffer_capacity: 10,
                rework_buffer: 10,
            }],
            planned_stops: vec![],
            start_stations: vec!["BODY-L1-S1".into()],
            models: vec!["P19".into(), "P20".into(), "P35".into()],
            colors: vec!["WHITE".into(), "BLACK".into(), "RED".into(), "BLUE".into()],
            dphu: 0.0,
            rework_time_ms: default_rework_time_ms(),
            speed_factor: 60,
            station_takt_min_fraction: 0.70,
            station_takt_max_fraction: 0.999,
            mix_items_per_line: 10,
            start_date: default_start_date(),
        }
    }

    /// Two chained lines in one shop with a bounded buffer between them.
    pub fn two_lines(buffer_cap: usize, jph: f64) -> Self {
        let mut config = Self::single_line(3, jph);
        let shop = &mut config.shops[0];
        shop.lines[0].routes = vec![RouteConfig {
            shop: "BODY".into(),
            line: "L2".into(),
        }];
        shop.lines[0].buffers = vec![buffer_cap];
        shop.lines.push(LineConfig {
            name: "L2".into(),
            stations: vec!["S1".into(), "S2".into(), "S3".into()],
            takt: TaktConfig {
                jph,
                shift_start: "07:00".into(),
                shift_end: "23:48".into(),
            },
            mttr: 6.0,
            mtbf: 120.0,
            routes: vec![],
            buffers: vec![],
            part_type: None,
            required_parts: vec![],
            part_consumption_station: None,
            create_with: None,
        });
        config
    }

    /// Two shops: BODY feeds ASSEMBLY across a shop boundary.
    /// Defective cars leaving BODY route through BODY-REWORK.
    pub fn two_shops(jph: f64, dphu: f64) -> Self {
        let mut config = Self::single_line(3, jph);
        config.dphu = dphu;
        config.shops[0].lines[0].routes = vec![RouteConfig {
            shop: "ASSEMBLY".into(),
            line: "A1".into(),
        }];
        config.shops[0].lines[0].buffers = vec![10];
        config.shops.push(ShopConfig {
            name: "ASSEMBLY".into(),
            lines: vec![LineConfig {
                name: "A1".into(),
                stations: vec!["S1".into(), "S2".into(), "S3".into()],
                takt: TaktConfig {
                    jph,
                    shift_start: "07:00".into(),
                    shift_end: "23:48".into(),
                },
                mttr: 6.0,
                mtbf: 120.0,
                routes: vec![],
                buffers: vec![],
                part_type: None,
                required_parts: vec![],
                part_consumption_station: None,
                create_with: None,
            }],
            buffer_capacity: 10,
            rework_buffer: 10,
        });
        config
    }

    /// A car line consuming two part types (X, Y) at its first station,
    /// fed by two final part lines in a SUPPLY shop.
    pub fn parts_plant(jph: f64) -> Self {
        let part_line = |name: &str, part_type: &str| LineConfig {
            name: name.into(),
            stations: vec!["P1".into(), "P2".into()],
            takt: TaktConfig {
                jph,
                shift_start: "07:00".into(),
                shift_end: "23:48".into(),
            },
            mttr: 6.0,
            mtbf: 120.0,
            routes: vec![],
            buffers: vec![],
            part_type: Some(part_type.into()),
            required_parts: vec![],
            part_consumption_station: None,
            create_with: None,
        };
        Self {
            shops: vec![
                ShopConfig {
                    name: "SUPPLY".into(),
                    lines: vec![part_line("PX", "X"), part_line("PY", "Y")],
                    buffer_capacity: 10,
                    rework_buffer: 5,
                },
                ShopConfig {
                    name: "TRIM".into(),
                    lines: vec![LineConfig {
                        name: "C1".into(),
                        stations: vec!["S1".into(), "S2".into(), "S3".into()],
                        takt: TaktConfig {
                            jph,
                            shift_start: "07:00".into(),
                            shift_end: "23:48".into(),
                        },
                        mttr: 6.0,
                        mtbf: 120.0,
                        routes: vec![],
                        buffers: vec![],
                        part_type: None,
                        required_parts: vec!["X".into(), "Y".into()],
                        part_consumption_station: Some("S1".into()),
                        create_with: None,
                    }],
                    buffer_capacity: 10,
                    rework_buffer: 5,
                },
            ],
            planned_stops: vec![],
            start_stations: vec![
                "SUPPLY-PX-P1".into(),
                "SUPPLY-PY-P1".into(),
                "TRIM-C1-S1".into(),
            ],
            models: vec!["P19".into(), "P20".into(), "P35".into()],
            colors: vec!["WHITE".into(), "BLACK".into(), "RED".into()],
            dphu: 0.0,
            rework_time_ms: default_rework_time_ms(),
            speed_factor: 60,
            station_takt_min_fraction: 0.70,
            station_takt_max_fraction: 0.999,
            mix_items_per_line: 10,
            start_date: default_start_date(),
        }
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self::single_line(4, 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = PlantConfig::two_shops(60.0, 5.0);
        let json = serde_json::to_string(&config).unwrap();
        let back: PlantConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.shops.len(), 2);
        assert_eq!(back.shops[0].lines[0].routes[0].shop, "ASSEMBLY");
        assert_eq!(back.dphu, 5.0);
    }

    #[test]
    fn renamed_keys_parse() {
        let json = r#"{
            "shops": [{
                "name": "BODY",
                "lines": [{
                    "name": "L1",
                    "stations": ["S1"],
                    "takt": { "jph": 30, "shiftStart": "06:30", "shiftEnd": "15:00" },
                    "MTTR": 5, "MTBF": 90,
                    "partType": "X"
                }],
                "bufferCapacity": 8,
                "reworkBuffer": 4
            }],
            "stationstartProduction": ["BODY-L1-S1"],
            "models": ["P19"],
            "colors": ["WHITE"],
            "DPHU": 2.5
        }"#;
        let config: PlantConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.shops[0].lines[0].part_type.as_deref(), Some("X"));
        assert_eq!(config.rework_time_ms, 3_600_000);
        assert_eq!(config.mix_items_per_line, 10);
        assert_eq!(config.station_takt_min_fraction, 0.70);
    }
}
