//! The simulation engine - one value per session, no shared state.
//!
//! The engine aggregates the clock, the frozen topology, the three
//! runtime stores (items, buffers, stops), the scheduler and the event
//! sink. tick() runs the six-phase pipeline atomically: no interleaving
//! of tick N and N+1, pause lands between ticks, stop() performs a full
//! memory reset of scheduler-owned state.
//!
//! Wall-clock pacing is the caller's concern (see sim-runner); the
//! engine only guarantees run-to-completion per tick.

use crate::{
    buffers::BufferRegistry,
    clock::{RunState, SimClock},
    config::PlantConfig,
    error::{SimError, SimResult},
    event::{EventSink, MemorySink, SimEvent, Throttle},
    items::WorkItemStore,
    kpi::{self, OeeData},
    rng::RngBank,
    scheduler::{Scheduler, StationState, TickCtx},
    snapshot,
    stops::StopRegistry,
    topology::PlantTopology,
    types::{SessionId, SimTimeMs, Tick, DAY_MS, MINUTE_MS},
};
use chrono::Timelike;

/// Snapshot-category emission intervals, simulated milliseconds.
/// Zero means every tick.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub plant_ms: SimTimeMs,
    pub buffers_ms: SimTimeMs,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            plant_ms: 0,
            buffers_ms: 0,
        }
    }
}

/// Fresh session id for callers that do not bring their own.
pub fn generate_session_id() -> SessionId {
    format!("session-{}", uuid::Uuid::new_v4())
}

pub struct SimEngine<S: EventSink> {
    pub session_id: SessionId,
    pub clock: SimClock,
    topo: PlantTopology,
    rng: RngBank,
    seed: u64,
    items: WorkItemStore,
    buffers: BufferRegistry,
    stops: StopRegistry,
    scheduler: Scheduler,
    sink: S,
    plant_throttle: Throttle,
    buffers_throttle: Throttle,
    /// Simulated timestamp of production day 0 at 00:00.
    day0_ms: SimTimeMs,
    /// Minute-of-day the clock is seeded to on each fresh day.
    boot_minute: u32,
}

impl SimEngine<MemorySink> {
    /// Engine with a collecting sink, for tests and replay tooling.
    pub fn build_test(session_id: &str, seed: u64, config: &PlantConfig) -> SimResult<Self> {
        Self::new(session_id.to_string(), seed, config, MemorySink::new())
    }
}

impl<S: EventSink> SimEngine<S> {
    pub fn new(
        session_id: SessionId,
        seed: u64,
        config: &PlantConfig,
        sink: S,
    ) -> SimResult<Self> {
        Self::with_throttle(session_id, seed, config, sink, ThrottleConfig::default())
    }

    pub fn with_throttle(
        session_id: SessionId,
        seed: u64,
        config: &PlantConfig,
        sink: S,
        throttle: ThrottleConfig,
    ) -> SimResult<Self> {
        let mut rng = RngBank::new(seed);
        let topo = PlantTopology::build(config, &mut rng)?;

        let day0_ms = topo
            .start_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| SimError::Config("bad start date".into()))?
            .and_utc()
            .timestamp_millis();
        // The clock boots at the earliest shift start of the plant.
        let boot_minute = topo
            .lines
            .iter()
            .map(|l| l.shift_start_min)
            .min()
            .unwrap_or(0);
        let start_ms = day0_ms + SimTimeMs::from(boot_minute) * MINUTE_MS;

        let clock = SimClock::new(session_id.clone(), start_ms, topo.speed_factor);
        let items = WorkItemStore::new(topo.lines.len(), topo.shops.len());
        let buffers = BufferRegistry::from_topology(&topo);
        let scheduler = Scheduler::new(&topo);

        Ok(Self {
            session_id,
            clock,
            rng,
            seed,
            items,
            buffers,
            stops: StopRegistry::new(),
            scheduler,
            sink,
            plant_throttle: Throttle::new(throttle.plant_ms),
            buffers_throttle: Throttle::new(throttle.buffers_ms),
            day0_ms,
            boot_minute,
            topo,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    // ── Control surface ────────────────────────────────────────────────

    /// Transition stopped -> running and materialize the current day's
    /// stop pools. State-change emission happens before the next tick.
    pub fn start(&mut self) {
        if self.clock.state == RunState::Paused {
            self.clock.resume();
        } else {
            self.clock.start();
        }
        let mut ctx = TickCtx {
            topo: &self.topo,
            items: &mut self.items,
            buffers: &mut self.buffers,
            stops: &mut self.stops,
            rng: &mut self.rng,
            sink: &mut self.sink,
            tick: self.clock.tick_number,
            now: self.clock.sim_time_ms,
            prev: self.clock.sim_time_ms,
        };
        self.scheduler.ensure_day_stops(&mut ctx);
        self.emit_tick_state();
    }

    /// Freeze between ticks. Accumulated simulated time is kept.
    pub fn pause(&mut self) {
        self.clock.pause();
        self.emit_tick_state();
    }

    pub fn resume(&mut self) {
        self.clock.resume();
        self.emit_tick_state();
    }

    /// Halt and reset all scheduler-owned state: items, buffers, stops,
    /// counters, exit records. The topology and seed survive.
    pub fn stop(&mut self) {
        self.clock.stop();
        self.items = WorkItemStore::new(self.topo.lines.len(), self.topo.shops.len());
        self.buffers = BufferRegistry::from_topology(&self.topo);
        self.stops.clear();
        self.scheduler.reset();
        self.plant_throttle.reset();
        self.buffers_throttle.reset();
        self.emit_tick_state();
    }

    /// Begin the next production day (distinct, incremented day key).
    pub fn restart(&mut self) {
        let next_day = self.day0_ms + SimTimeMs::from(self.clock.day_index + 1) * DAY_MS;
        let start_ms = next_day + SimTimeMs::from(self.boot_minute) * MINUTE_MS;
        self.clock.restart(start_ms);
        self.emit_tick_state();
    }

    /// Seed clock state for recovery before start().
    pub fn set_initial_state(&mut self, sim_time_ms: SimTimeMs, tick: Tick) {
        self.clock.set_initial_state(sim_time_ms, tick);
    }

    /// Schedule a stop on one station. Joins the normal stop lifecycle
    /// on the next tick whose time reaches `start_ms`.
    pub fn schedule_station_stop(
        &mut self,
        station_id: &str,
        reason: &str,
        kind: crate::stops::StopKind,
        start_ms: SimTimeMs,
        duration_ms: SimTimeMs,
    ) -> SimResult<crate::types::StopId> {
        let station_idx = self.topo.station_index(station_id)?;
        let line_idx = self.topo.stations[station_idx].line;
        Ok(self.stops.schedule(
            &self.topo,
            crate::stops::AffectedScope::SingleStation(station_idx),
            line_idx,
            reason,
            kind,
            crate::stops::Severity::Medium,
            start_ms,
            start_ms + duration_ms,
        ))
    }

    /// Recovery/test helper: create a part directly inside a part
    /// buffer. Returns the part id.
    pub fn load_part(&mut self, buffer_id: &str, model: &str) -> SimResult<String> {
        let buffer_idx = self.topo.buffer_index(buffer_id)?;
        let spec = &self.topo.buffers[buffer_idx];
        let part_type = spec.part_type.clone().ok_or_else(|| {
            SimError::Config(format!("buffer '{buffer_id}' is not a part buffer"))
        })?;
        let item = self
            .items
            .create_part(&part_type, model.to_string(), self.clock.sim_time_ms);
        if !self.buffers.restore(buffer_idx, item) {
            return Err(SimError::Config(format!("buffer '{buffer_id}' is full")));
        }
        Ok(self.items.get(item).id.clone())
    }

    /// Recovery helper: place a car into a normal or rework buffer
    /// before start(). Rework-loaded cars begin their dwell now.
    pub fn load_car(&mut self, buffer_id: &str, model: &str) -> SimResult<String> {
        let buffer_idx = self.topo.buffer_index(buffer_id)?;
        let colors = vec![self.topo.colors[0].clone()];
        let now = self.clock.sim_time_ms;
        let item = self.items.create_car(model.to_string(), colors, false, now);
        if self.topo.buffers[buffer_idx].kind == crate::buffers::BufferKind::Rework {
            self.items.enter_rework(item, "RESTORED".into(), now);
        }
        if !self.buffers.restore(buffer_idx, item) {
            return Err(SimError::Config(format!("buffer '{buffer_id}' is full")));
        }
        Ok(self.items.get(item).id.clone())
    }

    // ── Ticking ────────────────────────────────────────────────────────

    /// Advance one tick. The six-phase pipeline runs to completion.
    pub fn tick(&mut self) -> SimResult<()> {
        if !self.clock.is_running() {
            return Err(SimError::NotRunning {
                state: self.clock.state.name(),
            });
        }
        let prev = self.clock.sim_time_ms;
        let (tick, now) = self.clock.advance();
        self.emit_tick_state();

        let mut ctx = TickCtx {
            topo: &self.topo,
            items: &mut self.items,
            buffers: &mut self.buffers,
            stops: &mut self.stops,
            rng: &mut self.rng,
            sink: &mut self.sink,
            tick,
            now,
            prev,
        };
        self.scheduler.execute(&mut ctx);

        let plant = snapshot::plant_snapshot(&self.topo, &self.items, &self.scheduler, tick, now);
        self.plant_throttle.offer(
            "plant",
            SimEvent::PlantSnapshot { snapshot: plant },
            now,
            &mut self.sink,
        );
        let buffers = snapshot::buffer_snapshots(&self.buffers, &self.items);
        self.buffers_throttle.offer(
            "buffers",
            SimEvent::BuffersSnapshot { buffers, ts: now },
            now,
            &mut self.sink,
        );
        Ok(())
    }

    /// Run n ticks in a loop. Used for testing and fast-forward.
    pub fn run_ticks(&mut self, n: u64) -> SimResult<()> {
        if self.clock.state == RunState::Stopped {
            self.start();
        } else {
            self.resume();
        }
        for _ in 0..n {
            self.tick()?;
        }
        self.pause();
        Ok(())
    }

    fn emit_tick_state(&mut self) {
        self.sink.emit(&SimEvent::TickState {
            tick: self.clock.tick_number,
            status: self.clock.state.name().to_string(),
            simulated_time_ms: self.clock.sim_time_ms,
            speed_factor: self.clock.speed_factor,
        });
    }

    // ── Read access (tests, runner, snapshots) ─────────────────────────

    pub fn topology(&self) -> &PlantTopology {
        &self.topo
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn items(&self) -> &WorkItemStore {
        &self.items
    }

    pub fn buffers(&self) -> &BufferRegistry {
        &self.buffers
    }

    pub fn stops(&self) -> &StopRegistry {
        &self.stops
    }

    pub fn stations(&self) -> &[StationState] {
        self.scheduler.stations()
    }

    pub fn station_state(&self, station_id: &str) -> SimResult<&StationState> {
        let idx = self.topo.station_index(station_id)?;
        Ok(self.scheduler.station(idx))
    }

    /// Items produced on a line during the current shift.
    pub fn produced(&self, line_id: &str) -> SimResult<u64> {
        let idx = self.topo.line_index(line_id)?;
        Ok(self.items.produced_on_line(idx))
    }

    /// Dynamic OEE for every line, at the current simulated time.
    pub fn oee_report(&self) -> Vec<OeeData> {
        (0..self.topo.lines.len())
            .map(|l| kpi::line_oee(&self.topo, &self.items, l, self.clock.sim_time_ms, false))
            .collect()
    }

    /// Simulated wall time, useful for logs and summaries.
    pub fn sim_time_of_day(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.clock.sim_time_ms)
            .map(|dt| format!("{:02}:{:02}", dt.hour(), dt.minute()))
            .unwrap_or_else(|| "??:??".into())
    }
}
