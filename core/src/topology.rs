//! Immutable plant topology, built once from the config.
//!
//! Arena ownership: shops, lines, stations and buffer specs live in flat
//! vectors and reference each other by index. Runtime state (occupancy,
//! buffer contents, stops) lives elsewhere; nothing here changes after
//! build().
//!
//! Every name cross-reference in the config is resolved here. A reference
//! that does not resolve is a fatal `SimError::Config` and the engine
//! never starts.

use crate::{
    buffers::BufferKind,
    config::{PlantConfig, PlannedStopRule},
    error::{SimError, SimResult},
    rng::{RngBank, RngSlot},
    types::{BufferIdx, LineIdx, ShopIdx, SimTimeMs, StationIdx, HOUR_MS, MINUTE_MS},
};
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Produces cars.
    Car,
    /// Produces parts and routes them onward to another line.
    PartIntermediate,
    /// Produces parts straight into the consumer shop's part buffer.
    PartFinal,
}

#[derive(Debug, Clone)]
pub struct StationTopo {
    /// Exact id "{shop}-{line}-{station}". No suffix matching anywhere.
    pub id: String,
    pub name: String,
    pub shop: ShopIdx,
    pub line: LineIdx,
    /// Position within the line; 0 = first.
    pub pos: usize,
    /// Per-station cycle time, strictly below the line takt.
    pub takt_ms: SimTimeMs,
    /// Items are created here each tick the station is free.
    pub is_start: bool,
}

#[derive(Debug, Clone)]
pub struct RouteTopo {
    pub to_line: LineIdx,
    pub buffer: BufferIdx,
}

#[derive(Debug, Clone)]
pub struct LineTopo {
    /// "{shop}-{line}".
    pub id: String,
    pub name: String,
    pub shop: ShopIdx,
    pub kind: LineKind,
    pub jph: f64,
    pub takt_ms: SimTimeMs,
    /// Shift window, minutes from midnight.
    pub shift_start_min: u32,
    pub shift_end_min: u32,
    pub mttr_min: f64,
    pub mtbf_min: f64,
    pub stations: Vec<StationIdx>,
    pub routes: Vec<RouteTopo>,
    /// Normal buffers feeding this line's first station.
    pub input_buffers: Vec<BufferIdx>,
    /// Upstream shop's rework buffer, when an input crosses shops.
    pub rework_source: Option<BufferIdx>,
    pub part_type: Option<String>,
    pub required_parts: Vec<String>,
    /// Station position at which required parts are consumed.
    pub part_consumption_pos: Option<usize>,
    /// Create one item per recorded exit of (line, station pos).
    pub create_with: Option<(LineIdx, usize)>,
    /// Destination part buffer for PartFinal lines.
    pub target_part_buffer: Option<BufferIdx>,
    /// True for the last car line of its shop; defect exits go to rework.
    pub is_shop_last: bool,
}

impl LineTopo {
    pub fn last_pos(&self) -> usize {
        self.stations.len() - 1
    }

    pub fn shift_start_ts(&self, day_start_ms: SimTimeMs) -> SimTimeMs {
        day_start_ms + SimTimeMs::from(self.shift_start_min) * MINUTE_MS
    }

    pub fn shift_end_ts(&self, day_start_ms: SimTimeMs) -> SimTimeMs {
        day_start_ms + SimTimeMs::from(self.shift_end_min) * MINUTE_MS
    }

    pub fn shift_minutes(&self) -> i64 {
        i64::from(self.shift_end_min) - i64::from(self.shift_start_min)
    }

    /// Line takt in minutes (60/JPH).
    pub fn takt_minutes(&self) -> f64 {
        60.0 / self.jph
    }
}

#[derive(Debug, Clone)]
pub struct ShopTopo {
    pub name: String,
    pub lines: Vec<LineIdx>,
    pub buffer_capacity: usize,
    pub rework_buffer: BufferIdx,
    /// Last car line of the shop, if it has one.
    pub last_car_line: Option<LineIdx>,
}

/// Static description of a buffer; runtime contents live in BufferRegistry.
#[derive(Debug, Clone)]
pub struct BufferSpec {
    pub id: String,
    pub kind: BufferKind,
    pub capacity: usize,
    pub from_line: Option<LineIdx>,
    pub to_lines: Vec<LineIdx>,
    /// Owning shop: source shop for normal and rework buffers,
    /// destination shop for part buffers.
    pub shop: ShopIdx,
    pub part_type: Option<String>,
}

/// A planned-stop rule resolved against the topology.
#[derive(Debug, Clone)]
pub struct PlannedStopSpec {
    pub reason: String,
    pub start_min: u32,
    pub duration_ms: SimTimeMs,
    /// ISO weekdays (Mon=1..Sun=7). Empty = every day.
    pub days_of_week: Vec<u8>,
    /// Resolved shop indices. Empty = all shops.
    pub shops: Vec<ShopIdx>,
}

impl PlannedStopSpec {
    pub fn applies_to_shop(&self, shop: ShopIdx) -> bool {
        self.shops.is_empty() || self.shops.contains(&shop)
    }

    pub fn applies_on(&self, iso_weekday: u8) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&iso_weekday)
    }
}

pub struct PlantTopology {
    pub shops: Vec<ShopTopo>,
    pub lines: Vec<LineTopo>,
    pub stations: Vec<StationTopo>,
    pub buffers: Vec<BufferSpec>,
    pub start_stations: Vec<StationIdx>,
    pub planned_plan: Vec<PlannedStopSpec>,
    pub models: Vec<String>,
    pub colors: Vec<String>,
    pub dphu: f64,
    pub rework_time_ms: SimTimeMs,
    pub speed_factor: i64,
    /// Planned-mix block size: start car lines x mix items per line.
    pub mix_block_size: usize,
    pub mix_items_per_line: usize,
    pub start_date: NaiveDate,
    station_ids: HashMap<String, StationIdx>,
}

impl PlantTopology {
    pub fn build(config: &PlantConfig, rng: &mut RngBank) -> SimResult<Self> {
        let min_frac = config.station_takt_min_fraction;
        let max_frac = config.station_takt_max_fraction;
        if !(0.0 < min_frac && min_frac < max_frac && max_frac < 1.0) {
            return Err(SimError::Config(format!(
                "station takt fractions must satisfy 0 < min < max < 1, got {min_frac}..{max_frac}"
            )));
        }
        if config.models.is_empty() {
            return Err(SimError::Config("no models configured".into()));
        }
        if config.colors.is_empty() {
            return Err(SimError::Config("no colors configured".into()));
        }

        let mut shops: Vec<ShopTopo> = Vec::new();
        let mut lines: Vec<LineTopo> = Vec::new();
        let mut stations: Vec<StationTopo> = Vec::new();
        let mut buffers: Vec<BufferSpec> = Vec::new();
        let mut station_ids: HashMap<String, StationIdx> = HashMap::new();
        let mut line_ids: HashMap<(String, String), LineIdx> = HashMap::new();
        let mut shop_ids: HashMap<String, ShopIdx> = HashMap::new();

        // Pass 1: arenas for shops, lines and stations.
        for shop_cfg in &config.shops {
            let shop_idx = shops.len();
            if shop_ids.insert(shop_cfg.name.clone(), shop_idx).is_some() {
                return Err(SimError::Config(format!("duplicate shop '{}'", shop_cfg.name)));
            }
            let mut shop_lines = Vec::new();
            for line_cfg in &shop_cfg.lines {
                if line_cfg.takt.jph <= 0.0 {
                    return Err(SimError::Config(format!(
                        "line '{}-{}' has non-positive JPH",
                        shop_cfg.name, line_cfg.name
                    )));
                }
                if line_cfg.stations.is_empty() {
                    return Err(SimError::Config(format!(
                        "line '{}-{}' has no stations",
                        shop_cfg.name, line_cfg.name
                    )));
                }
                let line_idx = lines.len();
                let key = (shop_cfg.name.clone(), line_cfg.name.clone());
                if line_ids.insert(key, line_idx).is_some() {
                    return Err(SimError::Config(format!(
                        "duplicate line '{}-{}'",
                        shop_cfg.name, line_cfg.name
                    )));
                }

                let takt_ms = (3_600_000.0 / line_cfg.takt.jph).round() as SimTimeMs;
                let shift_start_min = parse_hhmm(&line_cfg.takt.shift_start)?;
                let shift_end_min = parse_hhmm(&line_cfg.takt.shift_end)?;
                if shift_end_min <= shift_start_min {
                    return Err(SimError::Config(format!(
                        "line '{}-{}' shift window is empty",
                        shop_cfg.name, line_cfg.name
                    )));
                }

                let mut line_stations = Vec::new();
                for (pos, st_name) in line_cfg.stations.iter().enumerate() {
                    let id = format!("{}-{}-{}", shop_cfg.name, line_cfg.name, st_name);
                    let station_idx = stations.len();
                    if station_ids.insert(id.clone(), station_idx).is_some() {
                        return Err(SimError::Config(format!("duplicate station '{id}'")));
                    }
                    let fraction = rng
                        .stream(RngSlot::Takt)
                        .biased_fraction(min_frac, max_frac);
                    let station_takt = ((takt_ms as f64) * fraction) as SimTimeMs;
                    stations.push(StationTopo {
                        id,
                        name: st_name.clone(),
                        shop: shop_idx,
                        line: line_idx,
                        pos,
                        takt_ms: station_takt.max(1),
                        is_start: false,
                    });
                    line_stations.push(station_idx);
                }

                let kind = match (&line_cfg.part_type, line_cfg.routes.is_empty()) {
                    (Some(_), true) => LineKind::PartFinal,
                    (Some(_), false) => LineKind::PartIntermediate,
                    (None, _) => LineKind::Car,
                };

                let part_consumption_pos = match &line_cfg.part_consumption_station {
                    Some(name) => Some(
                        line_cfg
                            .stations
                            .iter()
                            .position(|s| s == name)
                            .ok_or_else(|| {
                                SimError::Config(format!(
                                    "line '{}-{}': consumption station '{}' not on line",
                                    shop_cfg.name, line_cfg.name, name
                                ))
                            })?,
                    ),
                    None => None,
                };

                lines.push(LineTopo {
                    id: format!("{}-{}", shop_cfg.name, line_cfg.name),
                    name: line_cfg.name.clone(),
                    shop: shop_idx,
                    kind,
                    jph: line_cfg.takt.jph,
                    takt_ms,
                    shift_start_min,
                    shift_end_min,
                    mttr_min: line_cfg.mttr,
                    mtbf_min: line_cfg.mtbf,
                    stations: line_stations,
                    routes: Vec::new(),
                    input_buffers: Vec::new(),
                    rework_source: None,
                    part_type: line_cfg.part_type.clone(),
                    required_parts: line_cfg.required_parts.clone(),
                    part_consumption_pos,
                    create_with: None,
                    target_part_buffer: None,
                    is_shop_last: false,
                });
                shop_lines.push(line_idx);
            }
            shops.push(ShopTopo {
                name: shop_cfg.name.clone(),
                lines: shop_lines,
                buffer_capacity: shop_cfg.buffer_capacity,
                rework_buffer: 0, // wired in pass 2
                last_car_line: None,
            });
        }

        // Pass 2: one rework buffer per shop.
        for (shop_idx, shop) in shops.iter_mut().enumerate() {
            let buffer_idx = buffers.len();
            buffers.push(BufferSpec {
                id: format!("{}-REWORK", shop.name),
                kind: BufferKind::Rework,
                capacity: config.shops[shop_idx].rework_buffer,
                from_line: None,
                to_lines: Vec::new(),
                shop: shop_idx,
                part_type: None,
            });
            shop.rework_buffer = buffer_idx;
            shop.last_car_line = shop
                .lines
                .iter()
                .copied()
                .filter(|&l| lines[l].kind == LineKind::Car)
                .last();
        }

        // Pass 3: route buffers, input wiring, cross-shop rework sources.
        for shop_cfg in &config.shops {
            for line_cfg in &shop_cfg.lines {
                let from_idx = line_ids[&(shop_cfg.name.clone(), line_cfg.name.clone())];
                for (route_pos, route) in line_cfg.routes.iter().enumerate() {
                    let to_idx = *line_ids
                        .get(&(route.shop.clone(), route.line.clone()))
                        .ok_or_else(|| SimError::LineNotFound {
                            shop: route.shop.clone(),
                            line: route.line.clone(),
                        })?;
                    let capacity = line_cfg
                        .buffers
                        .get(route_pos)
                        .copied()
                        .unwrap_or(shop_cfg.buffer_capacity);
                    let buffer_idx = buffers.len();
                    buffers.push(BufferSpec {
                        id: format!("{}->{}", lines[from_idx].id, lines[to_idx].id),
                        kind: BufferKind::Normal,
                        capacity,
                        from_line: Some(from_idx),
                        to_lines: vec![to_idx],
                        shop: lines[from_idx].shop,
                        part_type: None,
                    });
                    lines[from_idx].routes.push(RouteTopo {
                        to_line: to_idx,
                        buffer: buffer_idx,
                    });
                    lines[to_idx].input_buffers.push(buffer_idx);
                    if lines[from_idx].shop != lines[to_idx].shop {
                        let upstream_rework = shops[lines[from_idx].shop].rework_buffer;
                        lines[to_idx].rework_source = Some(upstream_rework);
                    }
                }
            }
        }

        // Pass 4: part buffers "{destShop}-PARTS-{type}" for final part lines.
        let mut part_buffers: HashMap<(ShopIdx, String), BufferIdx> = HashMap::new();
        for line_idx in 0..lines.len() {
            if lines[line_idx].kind != LineKind::PartFinal {
                continue;
            }
            let part_type = lines[line_idx].part_type.clone().unwrap();
            let consumers: Vec<LineIdx> = (0..lines.len())
                .filter(|&l| lines[l].required_parts.contains(&part_type))
                .collect();
            let dest_shop = consumers.first().map(|&l| lines[l].shop).ok_or_else(|| {
                SimError::Config(format!(
                    "part line '{}' produces '{}' but no line consumes it",
                    lines[line_idx].id, part_type
                ))
            })?;
            let buffer_idx = *part_buffers
                .entry((dest_shop, part_type.clone()))
                .or_insert_with(|| {
                    let idx = buffers.len();
                    buffers.push(BufferSpec {
                        id: format!("{}-PARTS-{}", shops[dest_shop].name, part_type),
                        kind: BufferKind::Part,
                        capacity: shops[dest_shop].buffer_capacity,
                        from_line: Some(line_idx),
                        to_lines: consumers.clone(),
                        shop: dest_shop,
                        part_type: Some(part_type.clone()),
                    });
                    idx
                });
            lines[line_idx].target_part_buffer = Some(buffer_idx);
        }

        // Pass 5: shop-last flags, createWith links, start stations.
        for shop in &shops {
            if let Some(last) = shop.last_car_line {
                lines[last].is_shop_last = true;
            }
        }

        for shop_cfg in &config.shops {
            for line_cfg in &shop_cfg.lines {
                let Some(cw) = &line_cfg.create_with else { continue };
                let line_idx = line_ids[&(shop_cfg.name.clone(), line_cfg.name.clone())];
                let target_line = *line_ids
                    .get(&(cw.shop.clone(), cw.line.clone()))
                    .ok_or_else(|| SimError::LineNotFound {
                        shop: cw.shop.clone(),
                        line: cw.line.clone(),
                    })?;
                let target_id = format!("{}-{}-{}", cw.shop, cw.line, cw.station);
                let target_station =
                    *station_ids
                        .get(&target_id)
                        .ok_or_else(|| SimError::StationNotFound {
                            id: target_id.clone(),
                        })?;
                lines[line_idx].create_with =
                    Some((target_line, stations[target_station].pos));
            }
        }

        let mut start_stations = Vec::new();
        for id in &config.start_stations {
            let idx = *station_ids
                .get(id)
                .ok_or_else(|| SimError::StationNotFound { id: id.clone() })?;
            stations[idx].is_start = true;
            start_stations.push(idx);
        }
        if start_stations.is_empty() {
            return Err(SimError::Config("no start stations configured".into()));
        }

        // Planned-stop plan.
        let mut planned_plan = Vec::new();
        for rule in &config.planned_stops {
            planned_plan.push(resolve_planned_rule(rule, &shop_ids)?);
        }

        let start_date = NaiveDate::parse_from_str(&config.start_date, "%Y-%m-%d")
            .map_err(|e| SimError::Config(format!("bad startDate '{}': {e}", config.start_date)))?;

        let start_car_lines = start_stations
            .iter()
            .filter(|&&s| lines[stations[s].line].kind == LineKind::Car)
            .count()
            .max(1);
        let mix_block_size = start_car_lines * config.mix_items_per_line;

        Ok(Self {
            shops,
            lines,
            stations,
            buffers,
            start_stations,
            planned_plan,
            models: config.models.clone(),
            colors: config.colors.clone(),
            dphu: config.dphu,
            rework_time_ms: config.rework_time_ms,
            speed_factor: config.speed_factor,
            mix_block_size,
            mix_items_per_line: config.mix_items_per_line,
            start_date,
            station_ids,
        })
    }

    pub fn station_index(&self, id: &str) -> SimResult<StationIdx> {
        self.station_ids
            .get(id)
            .copied()
            .ok_or_else(|| SimError::StationNotFound { id: id.to_string() })
    }

    pub fn line_index(&self, id: &str) -> SimResult<LineIdx> {
        self.lines
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| match id.split_once('-') {
                Some((shop, line)) => SimError::LineNotFound {
                    shop: shop.to_string(),
                    line: line.to_string(),
                },
                None => SimError::Config(format!("bad line id '{id}'")),
            })
    }

    pub fn buffer_index(&self, id: &str) -> SimResult<BufferIdx> {
        self.buffers
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| SimError::BufferNotFound { id: id.to_string() })
    }

    pub fn shop_name(&self, shop: ShopIdx) -> &str {
        &self.shops[shop].name
    }

    pub fn line_name(&self, line: LineIdx) -> &str {
        &self.lines[line].name
    }

    pub fn station(&self, idx: StationIdx) -> &StationTopo {
        &self.stations[idx]
    }

    /// Station index of (line, pos).
    pub fn station_at(&self, line: LineIdx, pos: usize) -> StationIdx {
        self.lines[line].stations[pos]
    }

    /// Production minutes of a shift: shift length minus planned stops
    /// affecting the shop on the given ISO weekday.
    pub fn production_minutes(&self, line: LineIdx, iso_weekday: u8) -> i64 {
        let shop = self.lines[line].shop;
        let planned: i64 = self
            .planned_plan
            .iter()
            .filter(|p| p.applies_to_shop(shop) && p.applies_on(iso_weekday))
            .map(|p| p.duration_ms / MINUTE_MS)
            .sum();
        (self.lines[line].shift_minutes() - planned).max(0)
    }
}

fn resolve_planned_rule(
    rule: &PlannedStopRule,
    shop_ids: &HashMap<String, ShopIdx>,
) -> SimResult<PlannedStopSpec> {
    let mut resolved_shops = Vec::new();
    for name in &rule.affects_shops {
        let idx = shop_ids
            .get(name)
            .copied()
            .ok_or_else(|| SimError::Config(format!("planned stop references unknown shop '{name}'")))?;
        resolved_shops.push(idx);
    }
    if rule.duration_min <= 0 || rule.duration_min * MINUTE_MS > 24 * HOUR_MS {
        return Err(SimError::Config(format!(
            "planned stop '{}' has invalid duration {} min",
            rule.reason, rule.duration_min
        )));
    }
    Ok(PlannedStopSpec {
        reason: rule.reason.clone(),
        start_min: parse_hhmm(&rule.start)?,
        duration_ms: rule.duration_min * MINUTE_MS,
        days_of_week: rule.days_of_week.clone(),
        shops: resolved_shops,
    })
}

fn parse_hhmm(s: &str) -> SimResult<u32> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| SimError::Config(format!("bad time '{s}', expected HH:MM")))?;
    let h: u32 = h
        .parse()
        .map_err(|_| SimError::Config(format!("bad hour in '{s}'")))?;
    let m: u32 = m
        .parse()
        .map_err(|_| SimError::Config(format!("bad minute in '{s}'")))?;
    if h > 23 || m > 59 {
        return Err(SimError::Config(format!("time '{s}' out of range")));
    }
    Ok(h * 60 + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlantConfig;

    fn build(config: &PlantConfig) -> PlantTopology {
        let mut rng = RngBank::new(1);
        PlantTopology::build(config, &mut rng).expect("build topology")
    }

    #[test]
    fn station_ids_are_exact() {
        let topo = build(&PlantConfig::single_line(4, 60.0));
        assert!(topo.station_index("BODY-L1-S1").is_ok());
        assert!(topo.station_index("L1-S1").is_err());
        assert!(topo.station_index("BODY-L1-S9").is_err());
    }

    #[test]
    fn station_takt_is_strictly_below_line_takt() {
        let topo = build(&PlantConfig::single_line(8, 60.0));
        let line = &topo.lines[0];
        assert_eq!(line.takt_ms, 60_000);
        for &s in &line.stations {
            assert!(topo.stations[s].takt_ms < line.takt_ms);
            assert!(topo.stations[s].takt_ms >= (line.takt_ms as f64 * 0.70) as i64);
        }
    }

    #[test]
    fn line_kinds_are_derived() {
        let topo = build(&PlantConfig::parts_plant(60.0));
        assert_eq!(topo.lines[0].kind, LineKind::PartFinal);
        assert_eq!(topo.lines[1].kind, LineKind::PartFinal);
        assert_eq!(topo.lines[2].kind, LineKind::Car);
    }

    #[test]
    fn part_buffers_are_keyed_by_dest_shop_and_type() {
        let topo = build(&PlantConfig::parts_plant(60.0));
        assert!(topo.buffer_index("TRIM-PARTS-X").is_ok());
        assert!(topo.buffer_index("TRIM-PARTS-Y").is_ok());
        let px = &topo.lines[0];
        let buf = px.target_part_buffer.expect("PX target buffer");
        assert_eq!(topo.buffers[buf].id, "TRIM-PARTS-X");
    }

    #[test]
    fn rework_buffer_per_shop() {
        let topo = build(&PlantConfig::two_shops(60.0, 5.0));
        assert!(topo.buffer_index("BODY-REWORK").is_ok());
        assert!(topo.buffer_index("ASSEMBLY-REWORK").is_ok());
        // ASSEMBLY-A1 pulls across the shop boundary, so its rework
        // source is BODY's rework buffer.
        let a1 = topo.lines.iter().find(|l| l.id == "ASSEMBLY-A1").unwrap();
        let rework = a1.rework_source.expect("rework source");
        assert_eq!(topo.buffers[rework].id, "BODY-REWORK");
    }

    #[test]
    fn unknown_route_is_fatal() {
        let mut config = PlantConfig::single_line(3, 60.0);
        config.shops[0].lines[0].routes = vec![crate::config::RouteConfig {
            shop: "PAINT".into(),
            line: "NOPE".into(),
        }];
        let mut rng = RngBank::new(1);
        assert!(PlantTopology::build(&config, &mut rng).is_err());
    }

    #[test]
    fn unknown_start_station_is_fatal() {
        let mut config = PlantConfig::single_line(3, 60.0);
        config.start_stations = vec!["BODY-L1-S99".into()];
        let mut rng = RngBank::new(1);
        assert!(PlantTopology::build(&config, &mut rng).is_err());
    }

    #[test]
    fn production_minutes_subtract_planned_stops() {
        let mut config = PlantConfig::single_line(3, 60.0);
        config.planned_stops = vec![crate::config::PlannedStopRule {
            reason: "LUNCH".into(),
            start: "12:00".into(),
            duration_min: 60,
            days_of_week: vec![],
            affects_shops: vec![],
        }];
        let topo = build(&config);
        // 07:00..23:48 = 1008 minutes, minus 60 for lunch.
        assert_eq!(topo.production_minutes(0, 1), 948);
    }
}
