//! Stop registry - exclusive owner of every stop record.
//!
//! Stop kinds:
//!   - Planned:     materialized from the per-day plan (lunch, meetings).
//!   - Random:      failures generated per production day from MTBF/MTTR.
//!   - Propagation: blocked/starved flow attribution (NEXT_FULL etc).
//!   - Micro:       material shortages (LACK-{type}).
//!
//! Lifecycle: Planned -> InProgress -> Completed. Propagation and Micro
//! stops are born InProgress and are ended only by the flow condition
//! clearing, never by time.
//!
//! Active stops are indexed per station and per line so the hot-path
//! queries (has_blocking_stop, refresh) never scan the full history.
//!
//! A station's `stop_id` field references exactly one in-progress stop;
//! the registry may hold several stops touching the station (a planned
//! line stop overlapping a LACK stop), and the station fields are
//! refreshed to the highest-priority survivor whenever one changes.

use crate::{
    rng::StreamRng,
    scheduler::StationState,
    topology::PlantTopology,
    types::{LineIdx, ShopIdx, SimTimeMs, StationIdx, StopId, HOUR_MS, MINUTE_MS, SECOND_MS},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Flow reasons ──────────────────────────────────────────────────────

pub const NEXT_FULL: &str = "NEXT_FULL";
pub const PREV_EMPTY: &str = "PREV_EMPTY";
pub const BUFFER_EMPTY: &str = "Buffer Empty";
pub const BUFFER_FULL: &str = "Buffer Full";
pub const PART_BUFFER_FULL: &str = "Part Buffer Full";
pub const REWORK_FULL: &str = "Rework Full";

pub fn lack_reason(part_type: &str) -> String {
    format!("LACK-{part_type}")
}

pub fn is_flow_reason(reason: &str) -> bool {
    matches!(
        reason,
        NEXT_FULL | PREV_EMPTY | BUFFER_EMPTY | BUFFER_FULL | PART_BUFFER_FULL | REWORK_FULL
    )
}

/// Only blocking stops prevent pull/push. Flow and LACK stops are
/// informational: the flow itself is what is failing.
pub fn is_blocking_reason(reason: &str) -> bool {
    !is_flow_reason(reason) && !reason.starts_with("LACK-")
}

// ── Records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopKind {
    Planned,
    #[serde(rename = "RANDOM_GENERATE")]
    Random,
    Propagation,
    Micro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopStatus {
    Planned,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Which stations a stop applies to. Replaces the station="ALL"
/// convention: a line-wide stop is a first-class scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "station", rename_all = "snake_case")]
pub enum AffectedScope {
    AllStationsOfLine,
    SingleStation(StationIdx),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub shop: ShopIdx,
    pub line: LineIdx,
    pub scope: AffectedScope,
    pub reason: String,
    pub kind: StopKind,
    pub category: String,
    pub severity: Severity,
    pub status: StopStatus,
    pub start_time: SimTimeMs,
    pub end_time: SimTimeMs,
    /// Set on completion: end_time - start_time.
    pub duration_ms: SimTimeMs,
}

impl Stop {
    pub fn is_active(&self) -> bool {
        self.status != StopStatus::Completed
    }

    pub fn affected_stations(&self, topo: &PlantTopology) -> Vec<StationIdx> {
        match self.scope {
            AffectedScope::SingleStation(s) => vec![s],
            AffectedScope::AllStationsOfLine => topo.lines[self.line].stations.clone(),
        }
    }
}

/// Stop ids that changed state during a lifecycle pass.
#[derive(Debug, Default)]
pub struct LifecycleOutcome {
    pub started: Vec<StopId>,
    pub ended: Vec<StopId>,
    pub rescheduled: Vec<StopId>,
}

pub struct StopRegistry {
    stops: BTreeMap<StopId, Stop>,
    next_id: StopId,
    /// Active (planned or in-progress) single-station stops.
    active_by_station: BTreeMap<StationIdx, BTreeSet<StopId>>,
    /// Active line-wide stops.
    active_by_line: BTreeMap<LineIdx, BTreeSet<StopId>>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self {
            stops: BTreeMap::new(),
            next_id: 0,
            active_by_station: BTreeMap::new(),
            active_by_line: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: StopId) -> Option<&Stop> {
        self.stops.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stop> {
        self.stops.values()
    }

    pub fn completed(&self) -> impl Iterator<Item = &Stop> {
        self.stops.values().filter(|s| s.status == StopStatus::Completed)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Full memory reset (engine stop()).
    pub fn clear(&mut self) {
        self.stops.clear();
        self.active_by_station.clear();
        self.active_by_line.clear();
        self.next_id = 0;
    }

    fn next_id(&mut self) -> StopId {
        self.next_id += 1;
        self.next_id
    }

    fn alloc(&mut self, stop: Stop) -> StopId {
        let id = stop.id;
        match stop.scope {
            AffectedScope::SingleStation(s) => {
                self.active_by_station.entry(s).or_default().insert(id);
            }
            AffectedScope::AllStationsOfLine => {
                self.active_by_line.entry(stop.line).or_default().insert(id);
            }
        }
        self.stops.insert(id, stop);
        id
    }

    fn deactivate(&mut self, id: StopId) {
        let stop = &self.stops[&id];
        match stop.scope {
            AffectedScope::SingleStation(s) => {
                if let Some(set) = self.active_by_station.get_mut(&s) {
                    set.remove(&id);
                }
            }
            AffectedScope::AllStationsOfLine => {
                if let Some(set) = self.active_by_line.get_mut(&stop.line) {
                    set.remove(&id);
                }
            }
        }
    }

    // ── Queries (index-backed) ─────────────────────────────────────────

    /// Active (planned or in-progress) stops touching a station.
    pub fn active_for_station(&self, topo: &PlantTopology, station: StationIdx) -> Vec<&Stop> {
        let line = topo.stations[station].line;
        let mut out: Vec<&Stop> = Vec::new();
        if let Some(set) = self.active_by_station.get(&station) {
            out.extend(set.iter().map(|id| &self.stops[id]));
        }
        if let Some(set) = self.active_by_line.get(&line) {
            out.extend(set.iter().map(|id| &self.stops[id]));
        }
        out
    }

    /// In-progress stops touching a station.
    pub fn in_progress_for_station(
        &self,
        topo: &PlantTopology,
        station: StationIdx,
    ) -> Vec<&Stop> {
        self.active_for_station(topo, station)
            .into_iter()
            .filter(|s| s.status == StopStatus::InProgress)
            .collect()
    }

    pub fn has_blocking_stop(&self, topo: &PlantTopology, station: StationIdx) -> bool {
        self.in_progress_for_station(topo, station)
            .iter()
            .any(|s| is_blocking_reason(&s.reason))
    }

    fn find_in_progress(&self, station: StationIdx, reason: &str) -> Option<StopId> {
        let set = self.active_by_station.get(&station)?;
        set.iter()
            .map(|id| &self.stops[id])
            .find(|s| s.status == StopStatus::InProgress && s.reason == reason)
            .map(|s| s.id)
    }

    // ── Station field maintenance ──────────────────────────────────────

    /// Point the station's stop fields at the highest-priority in-progress
    /// stop (blocking first, then lowest id), or clear them.
    pub fn refresh_station(
        &self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        station: StationIdx,
    ) {
        let in_progress = self.in_progress_for_station(topo, station);
        let chosen = in_progress
            .into_iter()
            .min_by_key(|s| (!is_blocking_reason(&s.reason), s.id));
        let state = &mut stations[station];
        match chosen {
            Some(stop) => {
                state.is_stopped = true;
                state.stop_reason = Some(stop.reason.clone());
                state.stop_id = Some(stop.id);
                state.start_stop = Some(stop.start_time);
                state.finish_stop = Some(stop.end_time);
            }
            None => {
                state.is_stopped = false;
                state.stop_reason = None;
                state.stop_id = None;
                state.start_stop = None;
                state.finish_stop = None;
            }
        }
    }

    // ── Lifecycle (pipeline phase 1) ───────────────────────────────────

    /// Start due stops, complete elapsed ones, reschedule random stops
    /// that would land on a station that cannot fail.
    pub fn update_lifecycle(
        &mut self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        now: SimTimeMs,
    ) -> LifecycleOutcome {
        let mut outcome = LifecycleOutcome::default();
        let ids: Vec<StopId> = self.stops.keys().copied().collect();

        for id in ids {
            let (status, kind, start_time, end_time) = {
                let s = &self.stops[&id];
                (s.status, s.kind, s.start_time, s.end_time)
            };

            match status {
                StopStatus::Planned if start_time <= now => {
                    // A random failure needs a workpiece in the machine:
                    // a stop landing on an idle or already-stopped station
                    // is pushed two simulated hours out.
                    if kind == StopKind::Random && !self.can_materialize(topo, stations, id) {
                        let stop = self.stops.get_mut(&id).unwrap();
                        stop.start_time += 2 * HOUR_MS;
                        stop.end_time += 2 * HOUR_MS;
                        outcome.rescheduled.push(id);
                        continue;
                    }
                    let evicted = self.start_stop(topo, stations, id, now);
                    outcome.ended.extend(evicted);
                    outcome.started.push(id);
                }
                StopStatus::InProgress
                    if end_time <= now
                        && kind != StopKind::Propagation
                        && kind != StopKind::Micro =>
                {
                    // Propagation and Micro stops end by condition only.
                    self.complete_stop(topo, stations, id, end_time);
                    outcome.ended.push(id);
                }
                _ => {}
            }
        }
        outcome
    }

    fn can_materialize(
        &self,
        topo: &PlantTopology,
        stations: &[StationState],
        id: StopId,
    ) -> bool {
        self.stops[&id]
            .affected_stations(topo)
            .iter()
            .any(|&s| stations[s].occupied.is_some() && !stations[s].is_stopped)
    }

    /// Returns the flow/LACK stops evicted by this start, so the caller
    /// can emit their end transitions.
    fn start_stop(
        &mut self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        id: StopId,
        now: SimTimeMs,
    ) -> Vec<StopId> {
        let affected = self.stops[&id].affected_stations(topo);
        let reason = self.stops[&id].reason.clone();

        // An incoming real stop evicts flow/LACK stops first: a machine
        // failure on a starved station replaces the starvation record.
        let mut evicted = Vec::new();
        if is_blocking_reason(&reason) {
            for &station in &affected {
                let flow_ids: Vec<StopId> = self
                    .in_progress_for_station(topo, station)
                    .into_iter()
                    .filter(|s| !is_blocking_reason(&s.reason))
                    .map(|s| s.id)
                    .collect();
                for flow_id in flow_ids {
                    self.complete_stop(topo, stations, flow_id, now);
                    evicted.push(flow_id);
                }
            }
        }

        let stop = self.stops.get_mut(&id).unwrap();
        stop.status = StopStatus::InProgress;
        for &station in &affected {
            self.refresh_station(topo, stations, station);
        }
        evicted
    }

    fn complete_stop(
        &mut self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        id: StopId,
        ended_at: SimTimeMs,
    ) {
        self.deactivate(id);
        let affected = {
            let stop = self.stops.get_mut(&id).unwrap();
            stop.status = StopStatus::Completed;
            stop.end_time = ended_at;
            stop.duration_ms = (stop.end_time - stop.start_time).max(0);
            stop.affected_stations(topo)
        };
        for station in affected {
            self.refresh_station(topo, stations, station);
        }
    }

    // ── Flow / LACK stops (created in-progress, ended by condition) ────

    /// Start a propagation stop for (station, reason). At most one such
    /// stop is in progress per pair; returns None when it already exists
    /// or the station has never received a car.
    pub fn start_flow_stop(
        &mut self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        station: StationIdx,
        reason: &str,
        now: SimTimeMs,
    ) -> Option<StopId> {
        if stations[station].is_first_car {
            return None;
        }
        if self.find_in_progress(station, reason).is_some() {
            return None;
        }
        let topo_station = &topo.stations[station];
        let id = self.next_id();
        self.alloc(Stop {
            id,
            shop: topo_station.shop,
            line: topo_station.line,
            scope: AffectedScope::SingleStation(station),
            reason: reason.to_string(),
            kind: StopKind::Propagation,
            category: "FLOW".into(),
            severity: Severity::Low,
            status: StopStatus::InProgress,
            start_time: now,
            end_time: now,
            duration_ms: 0,
        });
        self.refresh_station(topo, stations, station);
        Some(id)
    }

    /// End the (station, reason) propagation stop if one is in progress.
    pub fn end_flow_stop(
        &mut self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        station: StationIdx,
        reason: &str,
        now: SimTimeMs,
    ) -> Option<StopId> {
        let id = self.find_in_progress(station, reason)?;
        self.complete_stop(topo, stations, id, now);
        Some(id)
    }

    /// Start a LACK-{type} stop (material shortage). One per missing type.
    pub fn start_lack_stop(
        &mut self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        station: StationIdx,
        part_type: &str,
        now: SimTimeMs,
    ) -> Option<StopId> {
        let reason = lack_reason(part_type);
        if self.find_in_progress(station, &reason).is_some() {
            return None;
        }
        let topo_station = &topo.stations[station];
        let id = self.next_id();
        self.alloc(Stop {
            id,
            shop: topo_station.shop,
            line: topo_station.line,
            scope: AffectedScope::SingleStation(station),
            reason,
            kind: StopKind::Micro,
            category: "MATERIAL".into(),
            severity: Severity::Low,
            status: StopStatus::InProgress,
            start_time: now,
            end_time: now,
            duration_ms: 0,
        });
        self.refresh_station(topo, stations, station);
        Some(id)
    }

    /// End every LACK-* stop at a station (parts were found).
    pub fn end_lack_stops(
        &mut self,
        topo: &PlantTopology,
        stations: &mut [StationState],
        station: StationIdx,
        now: SimTimeMs,
    ) -> Vec<StopId> {
        let ids: Vec<StopId> = self
            .in_progress_for_station(topo, station)
            .into_iter()
            .filter(|s| s.reason.starts_with("LACK-"))
            .map(|s| s.id)
            .collect();
        for &id in &ids {
            self.complete_stop(topo, stations, id, now);
        }
        ids
    }

    /// Schedule an explicit stop (maintenance windows, recovery
    /// restoration, tests). It joins the normal lifecycle as Planned.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule(
        &mut self,
        topo: &PlantTopology,
        scope: AffectedScope,
        line_idx: LineIdx,
        reason: &str,
        kind: StopKind,
        severity: Severity,
        start_time: SimTimeMs,
        end_time: SimTimeMs,
    ) -> StopId {
        let category = match kind {
            StopKind::Planned => "PLANNED",
            StopKind::Random => "TECHNICAL",
            StopKind::Propagation => "FLOW",
            StopKind::Micro => "MATERIAL",
        };
        let id = self.next_id();
        self.alloc(Stop {
            id,
            shop: topo.lines[line_idx].shop,
            line: line_idx,
            scope,
            reason: reason.to_string(),
            kind,
            category: category.into(),
            severity,
            status: StopStatus::Planned,
            start_time,
            end_time,
            duration_ms: 0,
        })
    }

    // ── Per-day generation ─────────────────────────────────────────────

    /// Materialize planned stops for one production day.
    pub fn generate_planned_for_day(
        &mut self,
        topo: &PlantTopology,
        day_start_ms: SimTimeMs,
        iso_weekday: u8,
    ) -> Vec<StopId> {
        let mut created = Vec::new();
        for spec in &topo.planned_plan {
            if !spec.applies_on(iso_weekday) {
                continue;
            }
            for shop_idx in 0..topo.shops.len() {
                if !spec.applies_to_shop(shop_idx) {
                    continue;
                }
                for &line_idx in &topo.shops[shop_idx].lines {
                    let start = day_start_ms + SimTimeMs::from(spec.start_min) * MINUTE_MS;
                    created.push(self.schedule(
                        topo,
                        AffectedScope::AllStationsOfLine,
                        line_idx,
                        &spec.reason,
                        StopKind::Planned,
                        Severity::High,
                        start,
                        start + spec.duration_ms,
                    ));
                }
            }
        }
        created
    }

    /// Regenerate the random-stop pool for one line's production day.
    /// Stale never-started random stops from earlier days are dropped.
    pub fn generate_random_for_line(
        &mut self,
        topo: &PlantTopology,
        line_idx: LineIdx,
        day_start_ms: SimTimeMs,
        iso_weekday: u8,
        rng: &mut StreamRng,
    ) -> Vec<StopId> {
        let stale: Vec<StopId> = self
            .stops
            .values()
            .filter(|s| {
                s.kind == StopKind::Random
                    && s.status == StopStatus::Planned
                    && s.line == line_idx
                    && s.start_time < day_start_ms
            })
            .map(|s| s.id)
            .collect();
        for id in stale {
            self.deactivate(id);
            self.stops.remove(&id);
        }

        let line = &topo.lines[line_idx];
        let production_min = topo.production_minutes(line_idx, iso_weekday);
        if line.mtbf_min <= 0.0 {
            return Vec::new();
        }
        let num_stops = (production_min as f64 / line.mtbf_min).floor() as usize;
        if num_stops == 0 {
            return Vec::new();
        }

        let production_ms = production_min * MINUTE_MS;
        let segment_ms = production_ms / num_stops as SimTimeMs;
        let shift_start = line.shift_start_ts(day_start_ms);

        // Draw starts, stations and raw durations first; the durations
        // are then scaled so the day's total approximates MTTR x n.
        let mut draws: Vec<(SimTimeMs, StationIdx, Severity, f64)> = Vec::new();
        for i in 0..num_stops {
            let offset =
                i as SimTimeMs * segment_ms + (rng.next_f64() * segment_ms as f64) as SimTimeMs;
            let station_pos = rng.next_u64_below(line.stations.len() as u64) as usize;
            let station = line.stations[station_pos];
            let severity_roll = rng.next_f64();
            let severity = if severity_roll < 0.70 {
                Severity::Low
            } else if severity_roll < 0.95 {
                Severity::Medium
            } else {
                Severity::High
            };
            let (lo, hi) = match severity {
                Severity::Low => (1.0, 5.0),
                Severity::Medium => (5.0, 10.0),
                Severity::High => (10.0, 60.0),
            };
            let duration_min = rng.in_range(lo, hi);
            draws.push((shift_start + offset, station, severity, duration_min));
        }

        let current_total: f64 = draws.iter().map(|d| d.3).sum();
        let target_total = line.mttr_min * num_stops as f64;
        let scale = if current_total > 0.0 {
            target_total / current_total
        } else {
            1.0
        };

        let mut created = Vec::new();
        for (start, station, severity, duration_min) in draws {
            let jitter = rng.in_range(0.8, 1.2);
            let duration_ms = ((duration_min * scale * jitter) * MINUTE_MS as f64) as SimTimeMs;
            let duration_ms = duration_ms.clamp(30 * SECOND_MS, 2 * HOUR_MS);
            let id = self.next_id();
            created.push(self.alloc(Stop {
                id,
                shop: line.shop,
                line: line_idx,
                scope: AffectedScope::SingleStation(station),
                reason: "EQUIPMENT_FAILURE".into(),
                kind: StopKind::Random,
                category: "TECHNICAL".into(),
                severity,
                status: StopStatus::Planned,
                start_time: start,
                end_time: start + duration_ms,
                duration_ms: 0,
            }));
        }
        created
    }
}

impl Default for StopRegistry {
    fn default() -> Self {
        Self::new()
    }
}
