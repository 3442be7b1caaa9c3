//! KPI engine - OEE, MTTR and MTBF.
//!
//! OEE here is the simplified realized/target throughput ratio:
//!   oee = (takt_time_min x produced) / production_time_min x 100
//! with production time = shift minutes minus planned stops affecting
//! the shop.
//!
//! MTTR/MTBF run over COMPLETED non-planned stops through a per-run
//! station index, so a full plant pass stays linear in the number of
//! stops. Values are rounded to two decimals at data construction and
//! nowhere earlier.

use crate::{
    items::WorkItemStore,
    stops::{AffectedScope, Stop, StopKind, StopRegistry},
    topology::PlantTopology,
    types::{LineIdx, ShopIdx, SimTimeMs, StationIdx, MINUTE_MS},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiScope {
    Station,
    Line,
    Shop,
    Plant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OeeData {
    pub scope: KpiScope,
    pub shop: Option<String>,
    pub line: Option<String>,
    pub oee: f64,
    pub jph: f64,
    pub cars_production: u64,
    pub production_time_min: i64,
    pub takt_time_min: f64,
    pub diff_time_min: f64,
    /// True for the shift-end rollup, false for dynamic in-shift values.
    pub shift_end: bool,
    pub ts: SimTimeMs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MttrMtbfData {
    pub scope: KpiScope,
    pub shop: Option<String>,
    pub line: Option<String>,
    pub station: Option<String>,
    pub mttr_min: f64,
    pub mtbf_min: f64,
    pub stop_count: usize,
    pub ts: SimTimeMs,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn day_start_ms(ts: SimTimeMs) -> SimTimeMs {
    ts - ts.rem_euclid(crate::types::DAY_MS)
}

/// ISO weekday (Mon=1..Sun=7) of a simulated timestamp.
pub fn iso_weekday(ts: SimTimeMs) -> u8 {
    use chrono::Datelike;
    chrono::DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.weekday().number_from_monday() as u8)
        .unwrap_or(1)
}

// ── OEE ───────────────────────────────────────────────────────────────

pub fn line_oee(
    topo: &PlantTopology,
    items: &WorkItemStore,
    line_idx: LineIdx,
    now: SimTimeMs,
    shift_end: bool,
) -> OeeData {
    let line = &topo.lines[line_idx];
    let weekday = iso_weekday(now);
    let production_min = topo.production_minutes(line_idx, weekday);
    let takt_min = line.takt_minutes();
    let produced = items.produced_on_line(line_idx);

    let jph = if shift_end {
        if production_min > 0 {
            produced as f64 / (production_min as f64 / 60.0)
        } else {
            0.0
        }
    } else {
        let shift_start = line.shift_start_ts(day_start_ms(now));
        let elapsed_h = (now - shift_start) as f64 / 3_600_000.0;
        if elapsed_h > 0.0 {
            produced as f64 / elapsed_h
        } else {
            0.0
        }
    };

    let (oee, diff) = oee_of(takt_min, produced, production_min);
    OeeData {
        scope: KpiScope::Line,
        shop: Some(topo.shops[line.shop].name.clone()),
        line: Some(line.name.clone()),
        oee: round2(oee),
        jph: round2(jph),
        cars_production: produced,
        production_time_min: production_min,
        takt_time_min: round2(takt_min),
        diff_time_min: round2(diff),
        shift_end,
        ts: now,
    }
}

/// Shop OEE: the shop-scoped completion counter against the shop's
/// output line (its last car line).
pub fn shop_oee(
    topo: &PlantTopology,
    items: &WorkItemStore,
    shop_idx: ShopIdx,
    now: SimTimeMs,
    shift_end: bool,
) -> Option<OeeData> {
    let shop = &topo.shops[shop_idx];
    let out_line_idx = shop.last_car_line?;
    let out_line = &topo.lines[out_line_idx];
    let weekday = iso_weekday(now);
    let production_min = topo.production_minutes(out_line_idx, weekday);
    let takt_min = out_line.takt_minutes();
    let produced = items.produced_in_shop(shop_idx);

    let jph = if production_min > 0 {
        produced as f64 / (production_min as f64 / 60.0)
    } else {
        0.0
    };
    let (oee, diff) = oee_of(takt_min, produced, production_min);
    Some(OeeData {
        scope: KpiScope::Shop,
        shop: Some(shop.name.clone()),
        line: None,
        oee: round2(oee),
        jph: round2(jph),
        cars_production: produced,
        production_time_min: production_min,
        takt_time_min: round2(takt_min),
        diff_time_min: round2(diff),
        shift_end,
        ts: now,
    })
}

/// Plant OEE: mean of shop OEEs; times and counts are summed.
pub fn plant_oee(
    topo: &PlantTopology,
    items: &WorkItemStore,
    now: SimTimeMs,
    shift_end: bool,
) -> Option<OeeData> {
    let shop_data: Vec<OeeData> = (0..topo.shops.len())
        .filter_map(|s| shop_oee(topo, items, s, now, shift_end))
        .collect();
    if shop_data.is_empty() {
        return None;
    }
    let n = shop_data.len() as f64;
    Some(OeeData {
        scope: KpiScope::Plant,
        shop: None,
        line: None,
        oee: round2(shop_data.iter().map(|d| d.oee).sum::<f64>() / n),
        jph: round2(shop_data.iter().map(|d| d.jph).sum::<f64>()),
        cars_production: shop_data.iter().map(|d| d.cars_production).sum(),
        production_time_min: shop_data.iter().map(|d| d.production_time_min).sum(),
        takt_time_min: round2(shop_data.iter().map(|d| d.takt_time_min).sum()),
        diff_time_min: round2(shop_data.iter().map(|d| d.diff_time_min).sum()),
        shift_end,
        ts: now,
    })
}

fn oee_of(takt_min: f64, produced: u64, production_min: i64) -> (f64, f64) {
    if production_min <= 0 {
        return (0.0, 0.0);
    }
    let realized = takt_min * produced as f64;
    let oee = (realized / production_min as f64 * 100.0).max(0.0);
    let diff = production_min as f64 - realized;
    (oee, diff)
}

// ── MTTR / MTBF ───────────────────────────────────────────────────────

/// Per-run stop index: (station) -> completed non-planned stops.
/// Built once per KPI pass to keep the rollup linear.
pub struct StopIndex<'a> {
    by_station: BTreeMap<StationIdx, Vec<&'a Stop>>,
}

impl<'a> StopIndex<'a> {
    pub fn build(stops: &'a StopRegistry) -> Self {
        let mut by_station: BTreeMap<StationIdx, Vec<&'a Stop>> = BTreeMap::new();
        for stop in stops.completed() {
            if stop.kind == StopKind::Planned {
                continue;
            }
            if let AffectedScope::SingleStation(station) = stop.scope {
                by_station.entry(station).or_default().push(stop);
            }
        }
        Self { by_station }
    }

    fn durations_min(&self, station: StationIdx) -> Vec<f64> {
        self.by_station
            .get(&station)
            .map(|stops| {
                stops
                    .iter()
                    .map(|s| s.duration_ms as f64 / MINUTE_MS as f64)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Station MTTR = mean completed stop duration; MTBF = production / count.
/// Zero stops: MTTR = 0, MTBF = the full production time.
pub fn station_mttr_mtbf(
    topo: &PlantTopology,
    index: &StopIndex<'_>,
    station: StationIdx,
    now: SimTimeMs,
) -> MttrMtbfData {
    let topo_station = &topo.stations[station];
    let production_min = topo.production_minutes(topo_station.line, iso_weekday(now)) as f64;
    let durations = index.durations_min(station);
    let count = durations.len();
    let (mttr, mtbf) = if count == 0 {
        (0.0, production_min)
    } else {
        (
            durations.iter().sum::<f64>() / count as f64,
            production_min / count as f64,
        )
    };
    MttrMtbfData {
        scope: KpiScope::Station,
        shop: Some(topo.shops[topo_station.shop].name.clone()),
        line: Some(topo.lines[topo_station.line].name.clone()),
        station: Some(topo_station.name.clone()),
        mttr_min: round2(mttr),
        mtbf_min: round2(mtbf),
        stop_count: count,
        ts: now,
    }
}

/// Line MTTR/MTBF: mean over stations that contributed stops.
pub fn line_mttr_mtbf(
    topo: &PlantTopology,
    index: &StopIndex<'_>,
    line_idx: LineIdx,
    now: SimTimeMs,
) -> (MttrMtbfData, Vec<MttrMtbfData>) {
    let line = &topo.lines[line_idx];
    let station_data: Vec<MttrMtbfData> = line
        .stations
        .iter()
        .map(|&s| station_mttr_mtbf(topo, index, s, now))
        .collect();
    let production_min = topo.production_minutes(line_idx, iso_weekday(now)) as f64;
    let (mttr, mtbf, count) = aggregate(&station_data, production_min);
    let line_data = MttrMtbfData {
        scope: KpiScope::Line,
        shop: Some(topo.shops[line.shop].name.clone()),
        line: Some(line.name.clone()),
        station: None,
        mttr_min: round2(mttr),
        mtbf_min: round2(mtbf),
        stop_count: count,
        ts: now,
    };
    (line_data, station_data)
}

/// Shop MTTR/MTBF: mean over lines that contributed stops.
pub fn shop_mttr_mtbf(
    topo: &PlantTopology,
    index: &StopIndex<'_>,
    shop_idx: ShopIdx,
    now: SimTimeMs,
) -> MttrMtbfData {
    let shop = &topo.shops[shop_idx];
    let line_data: Vec<MttrMtbfData> = shop
        .lines
        .iter()
        .map(|&l| line_mttr_mtbf(topo, index, l, now).0)
        .collect();
    let production_min = shop
        .last_car_line
        .map(|l| topo.production_minutes(l, iso_weekday(now)) as f64)
        .unwrap_or(0.0);
    let (mttr, mtbf, count) = aggregate(&line_data, production_min);
    MttrMtbfData {
        scope: KpiScope::Shop,
        shop: Some(shop.name.clone()),
        line: None,
        station: None,
        mttr_min: round2(mttr),
        mtbf_min: round2(mtbf),
        stop_count: count,
        ts: now,
    }
}

/// Mean of children with non-zero contributions; with no contributors
/// the parent reports MTTR 0 and MTBF = production time.
fn aggregate(children: &[MttrMtbfData], production_min: f64) -> (f64, f64, usize) {
    let contributing: Vec<&MttrMtbfData> =
        children.iter().filter(|d| d.stop_count > 0).collect();
    let total: usize = children.iter().map(|d| d.stop_count).sum();
    if contributing.is_empty() {
        return (0.0, production_min, 0);
    }
    let n = contributing.len() as f64;
    (
        contributing.iter().map(|d| d.mttr_min).sum::<f64>() / n,
        contributing.iter().map(|d| d.mtbf_min).sum::<f64>() / n,
        total,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oee_formula() {
        // 60 JPH -> takt 1 min; 948 production minutes; 948 cars = 100%.
        let (oee, diff) = oee_of(1.0, 948, 948);
        assert!((oee - 100.0).abs() < 1e-9);
        assert!(diff.abs() < 1e-9);

        let (oee, diff) = oee_of(1.0, 474, 948);
        assert!((oee - 50.0).abs() < 1e-9);
        assert!((diff - 474.0).abs() < 1e-9);
    }

    #[test]
    fn oee_clamps_to_zero_production_time() {
        let (oee, diff) = oee_of(1.0, 10, 0);
        assert_eq!(oee, 0.0);
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn weekday_of_epoch() {
        // 1970-01-01 was a Thursday.
        assert_eq!(iso_weekday(0), 4);
        assert_eq!(iso_weekday(crate::types::DAY_MS * 3), 7);
    }
}
