//! The per-tick pipeline - the heart of the simulation.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Update stop lifecycle
//!   2. Advance stations, last-to-first
//!   3. Advance buffers (first-station pulls, rework alternation)
//!   4. Create items at freed start stations
//!   5. Shift boundaries (KPI rollup, stop-pool regeneration)
//!   6. Dynamic OEE (deduplicated)
//!
//! Creation runs after advancement so a start station freed this tick
//! is refilled this tick (a line at takt produces one car per takt, not
//! one per two), and so createWith part lines see the station exits
//! recorded during this tick's advancement.
//!
//! RULES:
//!   - Station advancement is strictly last-to-first within each line;
//!     lines run in topology order. A car therefore moves at most once
//!     per tick.
//!   - Only blocking stops prevent pull/push. Flow and LACK stops are
//!     records, ended by the flow condition clearing.
//!   - Station exits recorded during advancement are read by createWith
//!     part lines in this tick's creation phase, then discarded.

use crate::{
    buffers::BufferRegistry,
    event::{EventSink, Location, SimEvent, StopEventRecord},
    items::WorkItemStore,
    kpi::{self, StopIndex},
    parts::{self, MatchOutcome},
    rng::{RngBank, RngSlot},
    stops::{
        StopRegistry, BUFFER_EMPTY, BUFFER_FULL, NEXT_FULL, PART_BUFFER_FULL, PREV_EMPTY,
        REWORK_FULL,
    },
    topology::{LineKind, PlantTopology},
    types::{BufferIdx, ItemIdx, LineIdx, ShopIdx, SimTimeMs, StationIdx, StopId, Tick},
};
use std::collections::{BTreeMap, BTreeSet};

/// Runtime state of one station. Occupancy and item reference are one
/// field: `occupied == Some(item)` is the only way to hold an item.
#[derive(Debug, Clone)]
pub struct StationState {
    pub occupied: Option<ItemIdx>,
    pub entered_at: SimTimeMs,
    pub is_stopped: bool,
    pub stop_reason: Option<String>,
    pub stop_id: Option<StopId>,
    pub start_stop: Option<SimTimeMs>,
    pub finish_stop: Option<SimTimeMs>,
    /// True until the station receives its first item. Propagation
    /// stops are suppressed for such stations.
    pub is_first_car: bool,
}

impl Default for StationState {
    fn default() -> Self {
        Self {
            occupied: None,
            entered_at: 0,
            is_stopped: false,
            stop_reason: None,
            stop_id: None,
            start_stop: None,
            finish_stop: None,
            is_first_car: true,
        }
    }
}

/// Everything one tick needs, borrowed from the engine.
pub struct TickCtx<'a, S: EventSink> {
    pub topo: &'a PlantTopology,
    pub items: &'a mut WorkItemStore,
    pub buffers: &'a mut BufferRegistry,
    pub stops: &'a mut StopRegistry,
    pub rng: &'a mut RngBank,
    pub sink: &'a mut S,
    pub tick: Tick,
    pub now: SimTimeMs,
    pub prev: SimTimeMs,
}

pub struct Scheduler {
    stations: Vec<StationState>,
    /// Exits recorded this tick, keyed by (line, station pos) -> model.
    station_exits: BTreeMap<(LineIdx, usize), String>,
    /// Per-line fairness toggle for rework-vs-buffer pulls.
    rework_toggle: Vec<bool>,
    /// Last emitted dynamic OEE per line: (produced, oee x100).
    last_oee: BTreeMap<LineIdx, (u64, i64)>,
    /// Day starts for which stop pools were generated.
    random_day: BTreeMap<LineIdx, SimTimeMs>,
    planned_day: Option<SimTimeMs>,
    shop_reset_day: BTreeMap<ShopIdx, SimTimeMs>,
}

impl Scheduler {
    pub fn new(topo: &PlantTopology) -> Self {
        Self {
            stations: vec![StationState::default(); topo.stations.len()],
            station_exits: BTreeMap::new(),
            rework_toggle: vec![false; topo.lines.len()],
            last_oee: BTreeMap::new(),
            random_day: BTreeMap::new(),
            planned_day: None,
            shop_reset_day: BTreeMap::new(),
        }
    }

    pub fn station(&self, idx: StationIdx) -> &StationState {
        &self.stations[idx]
    }

    pub fn stations(&self) -> &[StationState] {
        &self.stations
    }

    /// Full memory reset (engine stop()).
    pub fn reset(&mut self) {
        for state in &mut self.stations {
            *state = StationState::default();
        }
        self.station_exits.clear();
        self.rework_toggle.iter_mut().for_each(|t| *t = false);
        self.last_oee.clear();
        self.random_day.clear();
        self.planned_day = None;
        self.shop_reset_day.clear();
    }

    /// Materialize the current production day's stop pools if they have
    /// not been generated yet. Called at engine start and at each
    /// line's shift-start crossing.
    pub fn ensure_day_stops<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        let day = kpi::day_start_ms(ctx.now);
        let weekday = kpi::iso_weekday(ctx.now);
        if self.planned_day != Some(day) {
            let created = ctx.stops.generate_planned_for_day(ctx.topo, day, weekday);
            log::debug!("tick={} planned stops for day: {}", ctx.tick, created.len());
            self.planned_day = Some(day);
        }
        for line_idx in 0..ctx.topo.lines.len() {
            if self.random_day.get(&line_idx) != Some(&day) {
                let created = ctx.stops.generate_random_for_line(
                    ctx.topo,
                    line_idx,
                    day,
                    weekday,
                    ctx.rng.stream(RngSlot::StopGen),
                );
                log::debug!(
                    "tick={} line {} random stops: {}",
                    ctx.tick,
                    ctx.topo.lines[line_idx].id,
                    created.len()
                );
                self.random_day.insert(line_idx, day);
            }
        }
    }

    /// One tick. Phases run in the documented order, atomically.
    pub fn execute<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        self.station_exits.clear();
        self.update_stops(ctx);
        self.advance_stations(ctx);
        self.advance_buffers(ctx);
        self.create_items(ctx);
        self.shift_boundaries(ctx);
        self.dynamic_oee(ctx);
    }

    // ── Phase 1: stop lifecycle ────────────────────────────────────────

    fn update_stops<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        let outcome = ctx
            .stops
            .update_lifecycle(ctx.topo, &mut self.stations, ctx.now);
        for id in outcome.started {
            emit_stop(ctx, id, true);
        }
        for id in outcome.ended {
            emit_stop(ctx, id, false);
        }
        for id in outcome.rescheduled {
            log::debug!("tick={} stop {id} rescheduled +2h", ctx.tick);
        }
    }

    // ── Phase 2: creation at start stations ────────────────────────────

    fn create_items<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        let exits = self.station_exits.clone();
        let day = kpi::day_start_ms(ctx.now);
        for i in 0..ctx.topo.start_stations.len() {
            let station_idx = ctx.topo.start_stations[i];
            let line_idx = ctx.topo.stations[station_idx].line;
            let line = &ctx.topo.lines[line_idx];
            if ctx.now < line.shift_start_ts(day) || ctx.now >= line.shift_end_ts(day) {
                continue;
            }
            if self.stations[station_idx].occupied.is_some() {
                continue;
            }
            if ctx.stops.has_blocking_stop(ctx.topo, station_idx) {
                continue;
            }
            match line.kind {
                LineKind::Car => self.create_car_at(ctx, line_idx, station_idx),
                _ => self.create_part_at(ctx, line_idx, station_idx, &exits),
            }
        }
    }

    fn create_car_at<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        station_idx: StationIdx,
    ) {
        let line = &ctx.topo.lines[line_idx];
        let pos = ctx.topo.stations[station_idx].pos;
        let consumes_here =
            !line.required_parts.is_empty() && line.part_consumption_pos == Some(pos);

        let model = if consumes_here {
            let resolved = parts::resolve(ctx.topo, line_idx);
            match parts::match_any_model(&resolved, ctx.buffers, ctx.items) {
                MatchOutcome::Matched { model } => {
                    let consumed = parts::consume(&resolved, ctx.buffers, ctx.items, &model);
                    for id in
                        ctx.stops
                            .end_lack_stops(ctx.topo, &mut self.stations, station_idx, ctx.now)
                    {
                        emit_stop(ctx, id, false);
                    }
                    // The consuming car does not exist yet; its id is
                    // attached below after creation.
                    self.pending_consumed(ctx, station_idx, consumed, &model, None);
                    model
                }
                MatchOutcome::Missing { types } => {
                    self.report_shortage(ctx, station_idx, &types, None, None);
                    return;
                }
                MatchOutcome::NoMatch { .. } => {
                    let types: Vec<String> =
                        resolved.iter().map(|r| r.part_type.clone()).collect();
                    for part_type in &types {
                        let loc = location(ctx.topo, station_idx);
                        let event = SimEvent::PartShortage {
                            part_type: part_type.clone(),
                            model: None,
                            car_id: None,
                            shop: loc.shop,
                            line: loc.line,
                            station: loc.station,
                            ts: ctx.now,
                        };
                        ctx.sink.emit(&event);
                    }
                    return;
                }
            }
        } else {
            ctx.items
                .next_mix_model(&ctx.topo.models, ctx.topo.mix_block_size)
        };

        let colors = draw_colors(ctx);
        let has_defect = ctx
            .rng
            .stream(RngSlot::Defects)
            .chance(ctx.topo.dphu / 100.0);
        let item = ctx.items.create_car(model.clone(), colors, has_defect, ctx.now);
        self.occupy(ctx, station_idx, item);
        let loc = location(ctx.topo, station_idx);
        let id = ctx.items.get(item).id.clone();
        ctx.sink.emit(&SimEvent::CarCreated {
            id,
            model,
            shop: loc.shop,
            line: loc.line,
            station: loc.station,
            ts: ctx.now,
        });
    }

    fn create_part_at<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        station_idx: StationIdx,
        exits: &BTreeMap<(LineIdx, usize), String>,
    ) {
        let line = &ctx.topo.lines[line_idx];
        let part_type = line.part_type.clone().expect("part line has part_type");
        let model = match line.create_with {
            // Synchronized creation: one part per recorded exit of the
            // referenced car-line station, carrying that car's model.
            Some(key) => match exits.get(&key) {
                Some(model) => model.clone(),
                None => return,
            },
            None => ctx.items.next_part_mix_model(
                line_idx,
                &ctx.topo.models,
                ctx.topo.mix_items_per_line,
            ),
        };
        let item = ctx.items.create_part(&part_type, model.clone(), ctx.now);
        self.occupy(ctx, station_idx, item);
        let loc = location(ctx.topo, station_idx);
        let id = ctx.items.get(item).id.clone();
        ctx.sink.emit(&SimEvent::PartCreated {
            id,
            part_type,
            model,
            shop: loc.shop,
            line: loc.line,
            station: loc.station,
            ts: ctx.now,
        });
    }

    // ── Phase 3: station advancement, last-to-first ────────────────────

    fn advance_stations<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        for line_idx in 0..ctx.topo.lines.len() {
            let station_count = ctx.topo.lines[line_idx].stations.len();
            for pos in (0..station_count).rev() {
                let station_idx = ctx.topo.lines[line_idx].stations[pos];
                if ctx.stops.has_blocking_stop(ctx.topo, station_idx) {
                    continue;
                }
                match self.stations[station_idx].occupied {
                    Some(item) => {
                        let elapsed = ctx.now - self.stations[station_idx].entered_at;
                        if elapsed >= ctx.topo.stations[station_idx].takt_ms {
                            self.try_push(ctx, line_idx, pos, item);
                        }
                    }
                    None if pos > 0 => self.try_pull_from_prev(ctx, line_idx, pos),
                    None => {}
                }
            }
        }
    }

    fn try_pull_from_prev<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        pos: usize,
    ) {
        let line = &ctx.topo.lines[line_idx];
        let prev_idx = line.stations[pos - 1];
        let this_idx = line.stations[pos];
        let (prev_occupied, prev_entered) = {
            let prev = &self.stations[prev_idx];
            (prev.occupied, prev.entered_at)
        };
        match prev_occupied {
            Some(item)
                if ctx.now - prev_entered >= ctx.topo.stations[prev_idx].takt_ms
                    && !ctx.stops.has_blocking_stop(ctx.topo, prev_idx) =>
            {
                self.move_item(ctx, prev_idx, this_idx, item);
            }
            Some(_) => {} // upstream is still cycling: normal pipeline gap
            None => {
                if let Some(id) = ctx.stops.start_flow_stop(
                    ctx.topo,
                    &mut self.stations,
                    this_idx,
                    PREV_EMPTY,
                    ctx.now,
                ) {
                    emit_stop(ctx, id, true);
                }
            }
        }
    }

    fn try_push<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        pos: usize,
        item: ItemIdx,
    ) {
        let line = &ctx.topo.lines[line_idx];
        let station_idx = line.stations[pos];

        // Part consumption is validated before the push; consumption
        // itself happens only once the push goes through. Creation-time
        // consumers (start stations) already consumed at birth.
        let consumes_here = !line.required_parts.is_empty()
            && line.part_consumption_pos == Some(pos)
            && !ctx.topo.stations[station_idx].is_start;
        if consumes_here && !self.validate_parts(ctx, line_idx, station_idx, item) {
            return;
        }

        if pos < line.last_pos() {
            let next_idx = line.stations[pos + 1];
            if self.stations[next_idx].occupied.is_none()
                && !ctx.stops.has_blocking_stop(ctx.topo, next_idx)
            {
                if consumes_here {
                    self.consume_parts(ctx, line_idx, station_idx, item);
                }
                self.move_item(ctx, station_idx, next_idx, item);
            } else if let Some(id) = ctx.stops.start_flow_stop(
                ctx.topo,
                &mut self.stations,
                station_idx,
                NEXT_FULL,
                ctx.now,
            ) {
                emit_stop(ctx, id, true);
            }
            return;
        }

        self.push_out_of_line(ctx, line_idx, pos, item, consumes_here);
    }

    /// Last-station push: part buffer, rework, route buffer or completion.
    fn push_out_of_line<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        pos: usize,
        item: ItemIdx,
        consumes_here: bool,
    ) {
        let line = &ctx.topo.lines[line_idx];
        let station_idx = line.stations[pos];
        let shop_idx = ctx.topo.stations[station_idx].shop;
        let (is_part, has_defect, item_id) = {
            let it = ctx.items.get(item);
            (it.is_part, it.has_defect, it.id.clone())
        };

        // Final part lines feed the consumer shop's part buffer.
        if line.kind == LineKind::PartFinal {
            let Some(buffer_idx) = line.target_part_buffer else {
                log::warn!("line {} has no target part buffer; retrying next tick", line.id);
                return;
            };
            if ctx.buffers.get_mut(buffer_idx).push(item) {
                self.depart(ctx, station_idx, item);
                ctx.items.close_line_leadtime(item, line_idx, ctx.now);
                ctx.items.bump_line(line_idx);
                ctx.items.close_shop_leadtime(item, shop_idx, ctx.now);
                ctx.items.bump_shop(shop_idx);
                emit_buffer(ctx, station_idx, buffer_idx, &item_id, true);
            } else if let Some(id) = ctx.stops.start_flow_stop(
                ctx.topo,
                &mut self.stations,
                station_idx,
                PART_BUFFER_FULL,
                ctx.now,
            ) {
                emit_stop(ctx, id, true);
            }
            return;
        }

        // Defective cars leaving the shop's last line go to rework.
        if !is_part && has_defect && line.is_shop_last {
            let rework_idx = ctx.topo.shops[shop_idx].rework_buffer;
            if ctx.buffers.get_mut(rework_idx).push(item) {
                if consumes_here {
                    self.consume_parts(ctx, line_idx, station_idx, item);
                }
                self.depart(ctx, station_idx, item);
                ctx.items.close_line_leadtime(item, line_idx, ctx.now);
                ctx.items.bump_line(line_idx);
                let defect_id = format!("{item_id}-D{}", ctx.items.get(item).defects.len() + 1);
                ctx.items.enter_rework(item, defect_id.clone(), ctx.now);
                let loc = location(ctx.topo, station_idx);
                let buffer_id = ctx.buffers.get(rework_idx).id.clone();
                ctx.sink.emit(&SimEvent::ReworkIn {
                    item_id,
                    buffer_id,
                    shop: loc.shop,
                    line: Some(loc.line),
                    station: Some(loc.station),
                    defect_id: Some(defect_id),
                    ts: ctx.now,
                });
            } else if let Some(id) = ctx.stops.start_flow_stop(
                ctx.topo,
                &mut self.stations,
                station_idx,
                REWORK_FULL,
                ctx.now,
            ) {
                emit_stop(ctx, id, true);
            }
            return;
        }

        // Route buffers, first non-full route wins.
        if !line.routes.is_empty() {
            for route_pos in 0..line.routes.len() {
                let route = ctx.topo.lines[line_idx].routes[route_pos].clone();
                if ctx.buffers.get(route.buffer).is_full() {
                    continue;
                }
                if consumes_here {
                    self.consume_parts(ctx, line_idx, station_idx, item);
                }
                let pushed = ctx.buffers.get_mut(route.buffer).push(item);
                debug_assert!(pushed);
                self.depart(ctx, station_idx, item);
                ctx.items.close_line_leadtime(item, line_idx, ctx.now);
                ctx.items.bump_line(line_idx);
                if ctx.topo.lines[route.to_line].shop != shop_idx {
                    ctx.items.close_shop_leadtime(item, shop_idx, ctx.now);
                    ctx.items.bump_shop(shop_idx);
                }
                emit_buffer(ctx, station_idx, route.buffer, &item_id, true);
                return;
            }
            if let Some(id) = ctx.stops.start_flow_stop(
                ctx.topo,
                &mut self.stations,
                station_idx,
                BUFFER_FULL,
                ctx.now,
            ) {
                emit_stop(ctx, id, true);
            }
            return;
        }

        // No routes and not a part line: the car leaves the plant.
        if consumes_here {
            self.consume_parts(ctx, line_idx, station_idx, item);
        }
        self.depart(ctx, station_idx, item);
        ctx.items.close_line_leadtime(item, line_idx, ctx.now);
        ctx.items.bump_line(line_idx);
        ctx.items.close_shop_leadtime(item, shop_idx, ctx.now);
        ctx.items.bump_shop(shop_idx);
        let total_leadtime_ms = ctx.items.complete(item, ctx.now);
        ctx.sink.emit(&SimEvent::CarCompleted {
            id: item_id,
            location: location(ctx.topo, station_idx),
            total_leadtime_ms,
            ts: ctx.now,
        });
    }

    /// Check required parts for this car's model. On failure raise LACK
    /// stops, or divert the car to rework when a buffer is full of the
    /// wrong models. Returns true when the push may proceed.
    fn validate_parts<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        station_idx: StationIdx,
        item: ItemIdx,
    ) -> bool {
        let resolved = parts::resolve(ctx.topo, line_idx);
        let model = ctx.items.get(item).model.clone();
        let item_id = ctx.items.get(item).id.clone();
        match parts::match_model(&resolved, ctx.buffers, ctx.items, &model) {
            MatchOutcome::Matched { .. } => true,
            MatchOutcome::Missing { types } => {
                self.report_shortage(ctx, station_idx, &types, Some(&model), Some(&item_id));
                false
            }
            MatchOutcome::NoMatch { any_full: true } => {
                // Buffer full of the wrong models: this car cannot be
                // built here. Divert it to the shop's rework buffer.
                let shop_idx = ctx.topo.stations[station_idx].shop;
                let rework_idx = ctx.topo.shops[shop_idx].rework_buffer;
                if ctx.buffers.get_mut(rework_idx).push(item) {
                    self.depart(ctx, station_idx, item);
                    ctx.items.close_line_leadtime(item, line_idx, ctx.now);
                    ctx.items.enter_rework(item, "MISSING_PARTS".into(), ctx.now);
                    let loc = location(ctx.topo, station_idx);
                    let buffer_id = ctx.buffers.get(rework_idx).id.clone();
                    ctx.sink.emit(&SimEvent::ReworkIn {
                        item_id,
                        buffer_id,
                        shop: loc.shop,
                        line: Some(loc.line),
                        station: Some(loc.station),
                        defect_id: Some("MISSING_PARTS".into()),
                        ts: ctx.now,
                    });
                } else if let Some(id) = ctx.stops.start_flow_stop(
                    ctx.topo,
                    &mut self.stations,
                    station_idx,
                    REWORK_FULL,
                    ctx.now,
                ) {
                    emit_stop(ctx, id, true);
                }
                false
            }
            MatchOutcome::NoMatch { any_full: false } => {
                let types: Vec<String> = resolved.iter().map(|r| r.part_type.clone()).collect();
                self.report_shortage(ctx, station_idx, &types, Some(&model), Some(&item_id));
                false
            }
        }
    }

    fn consume_parts<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        station_idx: StationIdx,
        item: ItemIdx,
    ) {
        let resolved = parts::resolve(ctx.topo, line_idx);
        let model = ctx.items.get(item).model.clone();
        let car_id = ctx.items.get(item).id.clone();
        let consumed = parts::consume(&resolved, ctx.buffers, ctx.items, &model);
        for id in ctx
            .stops
            .end_lack_stops(ctx.topo, &mut self.stations, station_idx, ctx.now)
        {
            emit_stop(ctx, id, false);
        }
        self.pending_consumed(ctx, station_idx, consumed, &model, Some(&car_id));
    }

    fn pending_consumed<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        station_idx: StationIdx,
        consumed: Vec<(BufferIdx, ItemIdx)>,
        model: &str,
        car_id: Option<&str>,
    ) {
        for (_, part_idx) in consumed {
            ctx.items.consume_part(part_idx, ctx.now);
            let part = ctx.items.get(part_idx);
            let loc = location(ctx.topo, station_idx);
            let event = SimEvent::PartConsumed {
                part_id: part.id.clone(),
                part_type: part.part_type.clone().unwrap_or_default(),
                model: model.to_string(),
                car_id: car_id.map(str::to_string),
                shop: loc.shop,
                line: loc.line,
                station: loc.station,
                ts: ctx.now,
            };
            ctx.sink.emit(&event);
        }
    }

    fn report_shortage<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        station_idx: StationIdx,
        types: &[String],
        model: Option<&str>,
        car_id: Option<&str>,
    ) {
        for part_type in types {
            if let Some(id) = ctx.stops.start_lack_stop(
                ctx.topo,
                &mut self.stations,
                station_idx,
                part_type,
                ctx.now,
            ) {
                emit_stop(ctx, id, true);
            }
            let loc = location(ctx.topo, station_idx);
            let event = SimEvent::PartShortage {
                part_type: part_type.clone(),
                model: model.map(str::to_string),
                car_id: car_id.map(str::to_string),
                shop: loc.shop,
                line: loc.line,
                station: loc.station,
                ts: ctx.now,
            };
            ctx.sink.emit(&event);
        }
    }

    /// Station-to-station move within a line.
    fn move_item<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        from_idx: StationIdx,
        to_idx: StationIdx,
        item: ItemIdx,
    ) {
        let item_id = ctx.items.get(item).id.clone();
        self.depart(ctx, from_idx, item);
        self.occupy(ctx, to_idx, item);
        ctx.sink.emit(&SimEvent::CarMoved {
            id: item_id,
            from: location(ctx.topo, from_idx),
            to: location(ctx.topo, to_idx),
            ts: ctx.now,
        });
    }

    /// Leave a station: trace close, exit record, outflow stops end.
    fn depart<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        station_idx: StationIdx,
        item: ItemIdx,
    ) {
        ctx.items.leave_station(item, ctx.now);
        let st = &ctx.topo.stations[station_idx];
        self.station_exits
            .insert((st.line, st.pos), ctx.items.get(item).model.clone());
        self.stations[station_idx].occupied = None;
        for reason in [NEXT_FULL, BUFFER_FULL, PART_BUFFER_FULL, REWORK_FULL] {
            if let Some(id) =
                ctx.stops
                    .end_flow_stop(ctx.topo, &mut self.stations, station_idx, reason, ctx.now)
            {
                emit_stop(ctx, id, false);
            }
        }
    }

    /// Enter a station: bookkeeping plus inflow stops end.
    fn occupy<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        station_idx: StationIdx,
        item: ItemIdx,
    ) {
        let st = &ctx.topo.stations[station_idx];
        ctx.items
            .enter_station(item, st.shop, st.line, station_idx, ctx.now);
        let state = &mut self.stations[station_idx];
        state.occupied = Some(item);
        state.entered_at = ctx.now;
        state.is_first_car = false;
        for reason in [PREV_EMPTY, BUFFER_EMPTY] {
            if let Some(id) =
                ctx.stops
                    .end_flow_stop(ctx.topo, &mut self.stations, station_idx, reason, ctx.now)
            {
                emit_stop(ctx, id, false);
            }
        }
    }

    // ── Phase 4: buffer advancement / first-station pulls ──────────────

    fn advance_buffers<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        for line_idx in 0..ctx.topo.lines.len() {
            let line = &ctx.topo.lines[line_idx];
            if line.input_buffers.is_empty() && line.rework_source.is_none() {
                continue;
            }
            let station0 = line.stations[0];
            let use_rework = self.rework_toggle[line_idx];
            self.rework_toggle[line_idx] = !use_rework;

            if self.stations[station0].occupied.is_some() {
                continue;
            }
            if ctx.stops.has_blocking_stop(ctx.topo, station0) {
                continue;
            }

            let mut pulled = false;
            if use_rework {
                if let Some(rework_idx) = line.rework_source {
                    pulled = self.try_pull_rework(ctx, line_idx, station0, rework_idx);
                }
            }
            if !pulled {
                for buffer_pos in 0..ctx.topo.lines[line_idx].input_buffers.len() {
                    let buffer_idx = ctx.topo.lines[line_idx].input_buffers[buffer_pos];
                    if let Some(item) = ctx.buffers.get_mut(buffer_idx).pop() {
                        let item_id = ctx.items.get(item).id.clone();
                        emit_buffer(ctx, station0, buffer_idx, &item_id, false);
                        self.occupy(ctx, station0, item);
                        pulled = true;
                        break;
                    }
                }
            }
            if !pulled {
                let line = &ctx.topo.lines[line_idx];
                let starved = !line.input_buffers.is_empty()
                    && line
                        .input_buffers
                        .iter()
                        .all(|&b| ctx.buffers.get(b).is_empty());
                if starved {
                    if let Some(id) = ctx.stops.start_flow_stop(
                        ctx.topo,
                        &mut self.stations,
                        station0,
                        BUFFER_EMPTY,
                        ctx.now,
                    ) {
                        emit_stop(ctx, id, true);
                    }
                }
            }
        }
    }

    /// Pull the rework buffer's head if its dwell time has elapsed.
    fn try_pull_rework<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        _line_idx: LineIdx,
        station0: StationIdx,
        rework_idx: BufferIdx,
    ) -> bool {
        let Some(item) = ctx.buffers.get(rework_idx).front() else {
            return false;
        };
        let eligible = ctx.items.get(item).rework_entered_at.is_some_and(|entered| {
            ctx.now - entered >= ctx.topo.rework_time_ms
        });
        if !eligible {
            return false;
        }
        ctx.buffers.get_mut(rework_idx).pop();
        ctx.items.leave_rework(item);
        let upstream_shop = ctx.topo.buffers[rework_idx].shop;
        ctx.items.close_shop_leadtime(item, upstream_shop, ctx.now);
        ctx.items.bump_shop(upstream_shop);
        let item_id = ctx.items.get(item).id.clone();
        let buffer_id = ctx.buffers.get(rework_idx).id.clone();
        ctx.sink.emit(&SimEvent::ReworkOut {
            item_id,
            buffer_id,
            shop: ctx.topo.shops[upstream_shop].name.clone(),
            line: None,
            station: None,
            ts: ctx.now,
        });
        self.occupy(ctx, station0, item);
        true
    }

    // ── Phase 5: shift boundaries ──────────────────────────────────────

    fn shift_boundaries<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        let days: BTreeSet<SimTimeMs> =
            [kpi::day_start_ms(ctx.prev), kpi::day_start_ms(ctx.now)].into();
        let crossed = |boundary: SimTimeMs| ctx.prev < boundary && boundary <= ctx.now;

        let mut ended_lines: Vec<LineIdx> = Vec::new();
        let mut started_lines: Vec<(LineIdx, SimTimeMs)> = Vec::new();
        for line_idx in 0..ctx.topo.lines.len() {
            let line = &ctx.topo.lines[line_idx];
            for &day in &days {
                if crossed(line.shift_end_ts(day)) {
                    ended_lines.push(line_idx);
                }
                if crossed(line.shift_start_ts(day)) {
                    started_lines.push((line_idx, day));
                }
            }
        }

        if !ended_lines.is_empty() {
            self.shift_end_rollup(ctx, &ended_lines);
        }
        for (line_idx, day) in started_lines {
            self.shift_start_reset(ctx, line_idx, day);
        }
    }

    /// Shift-end: final OEE and MTTR/MTBF per line, aggregated per shop
    /// and plant. The stop index is built once for the whole rollup.
    fn shift_end_rollup<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>, lines: &[LineIdx]) {
        let index = StopIndex::build(ctx.stops);
        let mut shops: BTreeSet<ShopIdx> = BTreeSet::new();
        for &line_idx in lines {
            shops.insert(ctx.topo.lines[line_idx].shop);
            let oee = kpi::line_oee(ctx.topo, ctx.items, line_idx, ctx.now, true);
            log::debug!(
                "tick={} shift end {}: oee={:.2} produced={}",
                ctx.tick,
                ctx.topo.lines[line_idx].id,
                oee.oee,
                oee.cars_production
            );
            ctx.sink.emit(&SimEvent::OeeShiftEnd { data: oee });
            let (line_data, station_data) =
                kpi::line_mttr_mtbf(ctx.topo, &index, line_idx, ctx.now);
            for data in station_data {
                ctx.sink.emit(&SimEvent::MttrMtbfCalculated { data });
            }
            ctx.sink.emit(&SimEvent::MttrMtbfCalculated { data: line_data });
        }
        for &shop_idx in &shops {
            if let Some(data) = kpi::shop_oee(ctx.topo, ctx.items, shop_idx, ctx.now, true) {
                ctx.sink.emit(&SimEvent::OeeShiftEnd { data });
            }
            let data = kpi::shop_mttr_mtbf(ctx.topo, &index, shop_idx, ctx.now);
            ctx.sink.emit(&SimEvent::MttrMtbfCalculated { data });
        }
        if let Some(data) = kpi::plant_oee(ctx.topo, ctx.items, ctx.now, true) {
            ctx.sink.emit(&SimEvent::OeeShiftEnd { data });
        }
    }

    /// Shift-start: regenerate the day's stop pools and clear the
    /// completed-item counters.
    fn shift_start_reset<S: EventSink>(
        &mut self,
        ctx: &mut TickCtx<'_, S>,
        line_idx: LineIdx,
        day: SimTimeMs,
    ) {
        let weekday = kpi::iso_weekday(ctx.now);
        if self.planned_day != Some(day) {
            ctx.stops.generate_planned_for_day(ctx.topo, day, weekday);
            self.planned_day = Some(day);
        }
        if self.random_day.get(&line_idx) != Some(&day) {
            ctx.stops.generate_random_for_line(
                ctx.topo,
                line_idx,
                day,
                weekday,
                ctx.rng.stream(RngSlot::StopGen),
            );
            self.random_day.insert(line_idx, day);
        }
        ctx.items.reset_line_counter(line_idx);
        self.last_oee.remove(&line_idx);
        let shop_idx = ctx.topo.lines[line_idx].shop;
        if self.shop_reset_day.get(&shop_idx) != Some(&day) {
            ctx.items.reset_shop_counter(shop_idx);
            self.shop_reset_day.insert(shop_idx, day);
        }
    }

    // ── Phase 6: dynamic OEE ───────────────────────────────────────────

    fn dynamic_oee<S: EventSink>(&mut self, ctx: &mut TickCtx<'_, S>) {
        let day = kpi::day_start_ms(ctx.now);
        for line_idx in 0..ctx.topo.lines.len() {
            let line = &ctx.topo.lines[line_idx];
            if ctx.now < line.shift_start_ts(day) || ctx.now >= line.shift_end_ts(day) {
                continue;
            }
            let data = kpi::line_oee(ctx.topo, ctx.items, line_idx, ctx.now, false);
            let key = (data.cars_production, (data.oee * 100.0).round() as i64);
            if self.last_oee.get(&line_idx) != Some(&key) {
                self.last_oee.insert(line_idx, key);
                ctx.sink.emit(&SimEvent::OeeCalculated { data });
            }
        }
    }
}

/// One paint color, with a 15% chance of a distinct second color.
fn draw_colors<S: EventSink>(ctx: &mut TickCtx<'_, S>) -> Vec<String> {
    let palette = ctx.topo.colors.as_slice();
    let rng = ctx.rng.stream(RngSlot::Colors);
    let primary = rng.next_u64_below(palette.len() as u64) as usize;
    let mut colors = vec![palette[primary].clone()];
    if palette.len() > 1 && rng.chance(0.15) {
        let offset = 1 + rng.next_u64_below(palette.len() as u64 - 1) as usize;
        colors.push(palette[(primary + offset) % palette.len()].clone());
    }
    colors
}

// ── Emission helpers ──────────────────────────────────────────────────

fn location(topo: &PlantTopology, station_idx: StationIdx) -> Location {
    let st = &topo.stations[station_idx];
    Location {
        shop: topo.shops[st.shop].name.clone(),
        line: topo.lines[st.line].name.clone(),
        station: st.name.clone(),
    }
}

fn emit_stop<S: EventSink>(ctx: &mut TickCtx<'_, S>, id: StopId, started: bool) {
    let Some(stop) = ctx.stops.get(id) else { return };
    let record = StopEventRecord::from_stop(ctx.topo, stop);
    let event = if started {
        SimEvent::StopStarted {
            stop: record,
            ts: ctx.now,
        }
    } else {
        SimEvent::StopEnded {
            stop: record,
            ts: ctx.now,
        }
    };
    ctx.sink.emit(&event);
}

fn emit_buffer<S: EventSink>(
    ctx: &mut TickCtx<'_, S>,
    station_idx: StationIdx,
    buffer_idx: BufferIdx,
    item_id: &str,
    into: bool,
) {
    let loc = location(ctx.topo, station_idx);
    let buffer_id = ctx.buffers.get(buffer_idx).id.clone();
    let event = if into {
        SimEvent::BufferIn {
            item_id: item_id.to_string(),
            buffer_id,
            shop: loc.shop,
            line: loc.line,
            station: loc.station,
            ts: ctx.now,
        }
    } else {
        SimEvent::BufferOut {
            item_id: item_id.to_string(),
            buffer_id,
            shop: loc.shop,
            line: loc.line,
            station: loc.station,
            ts: ctx.now,
        }
    };
    ctx.sink.emit(&event);
}
